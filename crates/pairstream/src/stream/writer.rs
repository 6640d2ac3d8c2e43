//! # Parallel Writer
//!
//! Concurrent insertion into a [`PairStream`](super::PairStream).
//!
//! ```text
//! thread 0 ──┐
//! thread 1 ──┼──► ParallelWriter (shared) ──► stream k: claim slot (CAS)
//! thread N ──┘                                 block full? grow (lock)
//! ```
//!
//! Handles returned by a writer are not safe in context: the writer cannot
//! prove that no other thread touches the same entities.

use std::ptr::NonNull;
use std::sync::Arc;

use bytemuck::Zeroable;
use parking_lot::RwLockReadGuard;
use pairstream_core::EntityId;

use super::container::{PairSide, StreamState, Streams};
use super::pair::{Pair, PayloadMut};
use crate::error::PairStreamResult;

/// Entities and buckets of a pair about to be written concurrently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParallelWriteKey {
    entity_a: EntityId,
    bucket_a: u32,
    entity_b: EntityId,
    bucket_b: u32,
}

impl ParallelWriteKey {
    /// Creates a key.
    #[inline]
    #[must_use]
    pub const fn new(entity_a: EntityId, bucket_a: u32, entity_b: EntityId, bucket_b: u32) -> Self {
        Self {
            entity_a,
            bucket_a,
            entity_b,
            bucket_b,
        }
    }

    /// The first entity.
    #[inline]
    #[must_use]
    pub const fn entity_a(self) -> EntityId {
        self.entity_a
    }

    /// The second entity.
    #[inline]
    #[must_use]
    pub const fn entity_b(self) -> EntityId {
        self.entity_b
    }

    /// Bucket of the first entity.
    #[inline]
    #[must_use]
    pub const fn bucket_a(self) -> u32 {
        self.bucket_a
    }

    /// Bucket of the second entity.
    #[inline]
    #[must_use]
    pub const fn bucket_b(self) -> u32 {
        self.bucket_b
    }

    const fn sides(self, a_is_rw: bool, b_is_rw: bool) -> (PairSide, PairSide) {
        (
            PairSide {
                entity: self.entity_a,
                bucket: self.bucket_a,
                read_write: a_is_rw,
            },
            PairSide {
                entity: self.entity_b,
                bucket: self.bucket_b,
                read_write: b_is_rw,
            },
        )
    }
}

/// Shared insertion front-end. Any number of threads may call its methods
/// at once.
pub struct ParallelWriter<'a> {
    state: &'a Arc<StreamState>,
    streams: RwLockReadGuard<'a, Streams>,
}

impl<'a> ParallelWriter<'a> {
    pub(crate) fn new(state: &'a Arc<StreamState>) -> Self {
        Self {
            state,
            streams: state.read(),
        }
    }

    /// Number of buckets of the target container.
    #[inline]
    #[must_use]
    pub fn bucket_count(&self) -> u32 {
        self.state.strategy().bucket_count()
    }

    /// Stores a pair.
    ///
    /// # Errors
    ///
    /// Fails for an out-of-range bucket (with validation) or when storage
    /// cannot grow.
    pub fn add_pair(&self, key: ParallelWriteKey, a_is_rw: bool, b_is_rw: bool) -> PairStreamResult<Pair> {
        let (a, b) = key.sides(a_is_rw, b_is_rw);
        self.state.insert(&self.streams, a, b, false)
    }

    /// Stores a pair with a fresh zeroed `T` payload and borrows it.
    ///
    /// # Errors
    ///
    /// Same as [`ParallelWriter::add_pair`].
    pub fn add_pair_typed<T: Zeroable + Copy + 'static>(
        &self,
        key: ParallelWriteKey,
        a_is_rw: bool,
        b_is_rw: bool,
    ) -> PairStreamResult<(PayloadMut<'a, T>, Pair)> {
        let (a, b) = key.sides(a_is_rw, b_is_rw);
        self.state.insert_typed(&self.streams, a, b, false)
    }

    /// Stores a pair with `size` fresh zeroed payload bytes.
    ///
    /// # Errors
    ///
    /// Same as [`ParallelWriter::add_pair`], plus a bad alignment.
    pub fn add_pair_raw(
        &self,
        key: ParallelWriteKey,
        a_is_rw: bool,
        b_is_rw: bool,
        size: usize,
        align: usize,
    ) -> PairStreamResult<(Option<NonNull<u8>>, Pair)> {
        let (a, b) = key.sides(a_is_rw, b_is_rw);
        self.state.insert_raw(&self.streams, a, b, size, align, false)
    }
}

impl std::fmt::Debug for ParallelWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelWriter")
            .field("bucket_count", &self.bucket_count())
            .finish_non_exhaustive()
    }
}
