//! # Enumerator
//!
//! Walks every stream of a [`PairStream`](super::PairStream) in stream
//! order, and each stream in insertion order.

use std::sync::Arc;

use pairstream_core::SnapshotIter;

use super::container::StreamState;
use super::header::PairHeader;
use super::pair::Pair;
use crate::error::PairStreamResult;
use crate::VALIDATION_ENABLED;

/// Iterator over every stored pair, disabled pairs included.
///
/// Yielded handles only grant read access through
/// [`Pair::safe_entity_a`] and [`Pair::safe_entity_b`]; write access is
/// reserved for the dispatch callbacks.
///
/// Any insertion, concatenation or islanding after creation makes the
/// enumerator stale. With validation enabled, the next call to `next`
/// yields [`PairStreamError::StaleEnumerator`](crate::PairStreamError) once
/// and the enumerator is exhausted afterwards.
pub struct Enumerator {
    state: Arc<StreamState>,
    version: u64,
    pair_version: u64,
    streams: Vec<(usize, SnapshotIter<PairHeader>)>,
    position: usize,
    finished: bool,
    safe_in_context: bool,
}

impl Enumerator {
    pub(crate) fn new(state: Arc<StreamState>, safe_in_context: bool) -> Self {
        let (streams, version, pair_version) = {
            let guard = state.read();
            let streams = (0..guard.headers.stream_count())
                .filter_map(|stream| {
                    let snapshot = guard.headers.snapshot(stream).ok()?;
                    (!snapshot.is_empty()).then(|| (stream, snapshot.into_iter()))
                })
                .collect();
            (streams, state.enumeration_version(), state.pair_pointer_version())
        };
        Self {
            state,
            version,
            pair_version,
            streams,
            position: 0,
            finished: false,
            safe_in_context,
        }
    }

    /// Number of pairs left to yield.
    #[must_use]
    pub fn remaining(&self) -> usize {
        if self.finished {
            return 0;
        }
        self.streams
            .get(self.position..)
            .map_or(0, |rest| rest.iter().map(|(_, iter)| iter.len()).sum())
    }
}

impl Iterator for Enumerator {
    type Item = PairStreamResult<Pair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if VALIDATION_ENABLED {
            if let Err(err) = self.state.check_enumeration_version(self.version) {
                self.finished = true;
                return Some(Err(err));
            }
        }
        while let Some((stream, iter)) = self.streams.get_mut(self.position) {
            if let Some(header) = iter.next() {
                return Some(Ok(Pair::new(
                    Arc::clone(&self.state),
                    header,
                    *stream,
                    self.pair_version,
                    self.safe_in_context,
                )));
            }
            self.position += 1;
        }
        self.finished = true;
        None
    }
}

impl std::iter::FusedIterator for Enumerator {}

impl std::fmt::Debug for Enumerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enumerator")
            .field("version", &self.version)
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}
