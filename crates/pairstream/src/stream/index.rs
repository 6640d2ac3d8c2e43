//! # Stream Index Strategy
//!
//! Maps a pair's two bucket indices and access modes to one stream.
//!
//! ```text
//! streams for C buckets:
//!
//! [0 .. C)        bucket streams   pairs owned by one bucket
//! C               mixed stream     read-write on both sides, different buckets
//! [C+1 .. 2C+1)   island streams   mixed pairs after islanding
//! 2C+1            invalid stream   out-of-range buckets (validation off)
//! ```
//!
//! Routing for buckets `a != b`:
//!
//! | a side | b side | stream    |
//! |--------|--------|-----------|
//! | any    | RO     | bucket a  |
//! | RO     | RW     | bucket b  |
//! | RW     | RW     | mixed     |

use std::ops::Range;

use crate::error::{PairStreamError, PairStreamResult};
use crate::VALIDATION_ENABLED;

/// How a pair was routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamRoute {
    /// Both sides are in the same bucket.
    SameBucket,
    /// Different buckets; stored in bucket a's stream.
    BucketA,
    /// Different buckets; stored in bucket b's stream.
    BucketB,
    /// Different buckets, both sides read-write.
    Mixed,
    /// A bucket index was out of range.
    Invalid,
}

/// Result of routing one pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamSelection {
    /// Stream the pair is stored in.
    pub stream: usize,
    /// Why that stream was chosen.
    pub route: StreamRoute,
}

/// Stream layout for a fixed bucket count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamIndexStrategy {
    bucket_count: u32,
}

impl StreamIndexStrategy {
    /// Creates the layout for `bucket_count` buckets.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_count` is zero.
    #[must_use]
    pub const fn new(bucket_count: u32) -> Self {
        assert!(bucket_count > 0, "A stream layout needs at least one bucket");
        Self { bucket_count }
    }

    /// Number of streams needed for `bucket_count` buckets.
    #[inline]
    #[must_use]
    pub const fn stream_count_for(bucket_count: u32) -> usize {
        2 * bucket_count as usize + 2
    }

    /// Number of buckets.
    #[inline]
    #[must_use]
    pub const fn bucket_count(self) -> u32 {
        self.bucket_count
    }

    /// Number of streams.
    #[inline]
    #[must_use]
    pub const fn stream_count(self) -> usize {
        Self::stream_count_for(self.bucket_count)
    }

    /// Index of the mixed stream.
    #[inline]
    #[must_use]
    pub const fn mixed_stream(self) -> usize {
        self.bucket_count as usize
    }

    /// Index of the stream holding island `island`.
    ///
    /// Islands wrap around when there are more islands than buckets.
    #[inline]
    #[must_use]
    pub const fn island_stream(self, island: usize) -> usize {
        self.bucket_count as usize + 1 + island % self.bucket_count as usize
    }

    /// Index of the invalid stream.
    #[inline]
    #[must_use]
    pub const fn invalid_stream(self) -> usize {
        2 * self.bucket_count as usize + 1
    }

    /// The bucket streams.
    #[inline]
    #[must_use]
    pub const fn bucket_streams(self) -> Range<usize> {
        0..self.bucket_count as usize
    }

    /// The island streams.
    #[inline]
    #[must_use]
    pub const fn island_streams(self) -> Range<usize> {
        self.bucket_count as usize + 1..self.invalid_stream()
    }

    /// Checks that `bucket` is below the bucket count.
    ///
    /// # Errors
    ///
    /// Returns [`PairStreamError::BucketOutOfRange`] otherwise.
    #[inline]
    pub const fn check_bucket(self, bucket: u32) -> PairStreamResult<()> {
        if bucket < self.bucket_count {
            Ok(())
        } else {
            Err(PairStreamError::BucketOutOfRange {
                bucket,
                bucket_count: self.bucket_count,
            })
        }
    }

    /// Routes a pair to its stream.
    ///
    /// # Errors
    ///
    /// With validation enabled, an out-of-range bucket is an error. Without
    /// it, such pairs land in the invalid stream.
    pub fn select(
        self,
        bucket_a: u32,
        a_is_rw: bool,
        bucket_b: u32,
        b_is_rw: bool,
    ) -> PairStreamResult<StreamSelection> {
        if let Err(err) = self.check_bucket(bucket_a).and(self.check_bucket(bucket_b)) {
            if VALIDATION_ENABLED {
                return Err(err);
            }
            return Ok(StreamSelection {
                stream: self.invalid_stream(),
                route: StreamRoute::Invalid,
            });
        }

        let (stream, route) = if bucket_a == bucket_b {
            (bucket_a as usize, StreamRoute::SameBucket)
        } else if !b_is_rw {
            (bucket_a as usize, StreamRoute::BucketA)
        } else if !a_is_rw {
            (bucket_b as usize, StreamRoute::BucketB)
        } else {
            (self.mixed_stream(), StreamRoute::Mixed)
        };
        Ok(StreamSelection { stream, route })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let strategy = StreamIndexStrategy::new(4);
        assert_eq!(strategy.stream_count(), 10);
        assert_eq!(strategy.bucket_streams(), 0..4);
        assert_eq!(strategy.mixed_stream(), 4);
        assert_eq!(strategy.island_streams(), 5..9);
        assert_eq!(strategy.invalid_stream(), 9);
    }

    #[test]
    fn test_island_streams_wrap() {
        let strategy = StreamIndexStrategy::new(3);
        assert_eq!(strategy.island_stream(0), 4);
        assert_eq!(strategy.island_stream(2), 6);
        assert_eq!(strategy.island_stream(3), 4);
    }

    #[test]
    fn test_routing_table() {
        let strategy = StreamIndexStrategy::new(4);
        let route = |a, a_rw, b, b_rw| strategy.select(a, a_rw, b, b_rw).unwrap();

        assert_eq!(route(2, true, 2, true).stream, 2);
        assert_eq!(route(2, true, 2, true).route, StreamRoute::SameBucket);

        assert_eq!(route(1, true, 3, false).stream, 1);
        assert_eq!(route(1, false, 3, false).route, StreamRoute::BucketA);
        assert_eq!(route(1, false, 3, true).stream, 3);
        assert_eq!(route(1, false, 3, true).route, StreamRoute::BucketB);
        assert_eq!(route(1, true, 3, true).stream, 4);
        assert_eq!(route(1, true, 3, true).route, StreamRoute::Mixed);
    }

    #[test]
    #[cfg(any(debug_assertions, feature = "validation"))]
    fn test_out_of_range_bucket_fails() {
        let strategy = StreamIndexStrategy::new(4);
        assert_eq!(
            strategy.select(0, true, 4, true),
            Err(PairStreamError::BucketOutOfRange {
                bucket: 4,
                bucket_count: 4
            })
        );
    }

    #[test]
    #[cfg(not(any(debug_assertions, feature = "validation")))]
    fn test_out_of_range_bucket_is_invalid() {
        let strategy = StreamIndexStrategy::new(4);
        let selection = strategy.select(0, true, 4, true).unwrap();
        assert_eq!(selection.stream, strategy.invalid_stream());
        assert_eq!(selection.route, StreamRoute::Invalid);
    }

    #[test]
    #[should_panic(expected = "at least one bucket")]
    fn test_zero_buckets_panics() {
        let _ = StreamIndexStrategy::new(0);
    }
}
