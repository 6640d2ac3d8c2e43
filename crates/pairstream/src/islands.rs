//! # Islands
//!
//! Groups pairs so that no two groups touch the same written entity.
//!
//! ```text
//! pass 1: pairs writing the same entity      ──► union
//! pass 2: pair reading an entity ──► union with that entity's writer
//!
//!   (A rw, B rw) (B rw, C ro) (D rw, E ro) (E ro, F ro)
//!   └──────── island 0 ─────┘ └─ island 1 ┘ └ island 2 ┘
//! ```
//!
//! Pairs that only share read-only entities stay apart, since concurrent
//! reads do not conflict.

#![allow(unsafe_code)]

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::iter;
use std::ptr::NonNull;
use std::sync::Arc;

use pairstream_core::{Block, EntityId};
use tracing::debug;

use crate::error::{PairStreamError, PairStreamResult};
use crate::stream::{flags, Pair, PairHeader, PairStream, StreamState};

/// Union-find over dense indices.
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut index: usize) -> usize {
        while self.parent[index] != index {
            let grandparent = self.parent[self.parent[index]];
            self.parent[index] = grandparent;
            index = grandparent;
        }
        index
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            std::cmp::Ordering::Less => self.parent[a] = b,
            std::cmp::Ordering::Greater => self.parent[b] = a,
            std::cmp::Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] = self.rank[a].saturating_add(1);
            }
        }
    }
}

/// Location of one stored pair.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PairSlot {
    pub(crate) stream: usize,
    pub(crate) header: NonNull<PairHeader>,
}

// SAFETY: headers are only touched through atomics, and every slot holder
// keeps the header's block alive.
unsafe impl Send for PairSlot {}
// SAFETY: as above.
unsafe impl Sync for PairSlot {}

impl PairSlot {
    fn header(&self) -> &PairHeader {
        // SAFETY: slots are built from snapshots whose blocks the collector
        // keeps alive for as long as the slot is used.
        unsafe { self.header.as_ref() }
    }
}

/// Collects the pairs of `streams` in stream order, keeping their blocks
/// alive in `keep`.
pub(crate) fn collect_slots(
    state: &StreamState,
    streams: impl IntoIterator<Item = usize>,
    enabled_only: bool,
    keep: &mut Vec<Arc<Block>>,
) -> PairStreamResult<Vec<PairSlot>> {
    let guard = state.read();
    let mut slots = Vec::new();
    for stream in streams {
        let snapshot = guard.headers.snapshot(stream)?;
        keep.extend(snapshot.blocks().cloned());
        for header in snapshot {
            let slot = PairSlot { stream, header };
            if !enabled_only || slot.header().is_enabled() {
                slots.push(slot);
            }
        }
    }
    Ok(slots)
}

/// Partitions `slots` into islands of slot indices. Islands are ordered by
/// their first member, and members keep their order in `slots`.
pub(crate) fn group_slots(slots: &[PairSlot]) -> Vec<Vec<usize>> {
    let mut sets = DisjointSet::new(slots.len());
    let mut writers: HashMap<EntityId, usize> = HashMap::new();

    let sides = |slot: &PairSlot| {
        let header = slot.header();
        [
            (header.entity_a(), header.has(flags::A_RW)),
            (header.entity_b(), header.has(flags::B_RW)),
        ]
    };

    for (index, slot) in slots.iter().enumerate() {
        for (entity, rw) in sides(slot) {
            if !rw {
                continue;
            }
            match writers.entry(entity) {
                Entry::Occupied(writer) => sets.union(*writer.get(), index),
                Entry::Vacant(vacant) => {
                    vacant.insert(index);
                }
            }
        }
    }
    for (index, slot) in slots.iter().enumerate() {
        for (entity, rw) in sides(slot) {
            if rw {
                continue;
            }
            if let Some(&writer) = writers.get(&entity) {
                sets.union(writer, index);
            }
        }
    }

    let mut island_of_root: HashMap<usize, usize> = HashMap::new();
    let mut islands: Vec<Vec<usize>> = Vec::new();
    for index in 0..slots.len() {
        let root = sets.find(index);
        let island = *island_of_root.entry(root).or_insert_with(|| {
            islands.push(Vec::new());
            islands.len() - 1
        });
        islands[island].push(index);
    }
    islands
}

/// Independent groups of enabled pairs over a whole container.
///
/// Pairs in different groups never share an entity that either of them
/// writes, so groups may be processed on different threads.
pub struct Islands {
    state: Arc<StreamState>,
    version: u64,
    groups: Vec<Vec<PairSlot>>,
    blocks: Vec<Arc<Block>>,
}

impl Islands {
    /// Computes islands over every enabled pair in `stream`, the invalid
    /// stream excluded.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub fn build(stream: &mut PairStream) -> PairStreamResult<Self> {
        let state = Arc::clone(stream.state());
        let strategy = state.strategy();
        let mut blocks = Vec::new();
        let slots = collect_slots(&state, 0..strategy.invalid_stream(), true, &mut blocks)?;
        let groups = group_slots(&slots)
            .into_iter()
            .map(|members| members.into_iter().map(|index| slots[index]).collect())
            .collect();
        let version = state.pair_pointer_version();
        Ok(Self {
            state,
            version,
            groups,
            blocks,
        })
    }

    /// Number of islands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Checks whether there are no islands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of pairs across all islands.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Number of pairs in island `island`; zero if out of range.
    #[must_use]
    pub fn island_len(&self, island: usize) -> usize {
        self.groups.get(island).map_or(0, Vec::len)
    }

    /// Handles to the pairs of island `island`, in storage order.
    ///
    /// The handles only grant read access to their entities.
    pub fn island(&self, island: usize) -> impl Iterator<Item = Pair> + '_ {
        self.groups
            .get(island)
            .into_iter()
            .flatten()
            .map(|slot| self.pair(*slot))
    }

    fn pair(&self, slot: PairSlot) -> Pair {
        Pair::new(
            Arc::clone(&self.state),
            slot.header,
            slot.stream,
            self.version,
            false,
        )
    }

    /// The groups, plus the blocks that keep their headers alive.
    pub(crate) fn into_parts(self) -> (Vec<Vec<PairSlot>>, Vec<Arc<Block>>) {
        (self.groups, self.blocks)
    }
}

impl std::fmt::Debug for Islands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Islands")
            .field("islands", &self.groups.len())
            .field("pairs", &self.pair_count())
            .finish_non_exhaustive()
    }
}

impl PairStream {
    /// Moves every pair of the mixed stream, and any pair left in the island
    /// streams by an earlier pass, into island streams grouped by
    /// [`Islands`]. Island `i` lands in stream `C + 1 + i % C`.
    ///
    /// Returns the number of islands. Clears [`PairStream::needs_islanding`];
    /// handles and enumerators become stale. Payloads do not move.
    ///
    /// # Errors
    ///
    /// Fails with [`PairStreamError::PayloadBorrowed`] while a payload guard
    /// on an affected pair is alive, or when storage cannot grow.
    pub fn island_mixed_pairs(&mut self) -> PairStreamResult<usize> {
        let state = self.state();
        let strategy = state.strategy();
        let sources: Vec<usize> = iter::once(strategy.mixed_stream())
            .chain(strategy.island_streams())
            .collect();

        let mut keep = Vec::new();
        let slots = collect_slots(state, sources.iter().copied(), false, &mut keep)?;
        if slots.is_empty() {
            state.clear_needs_islanding();
            return Ok(0);
        }
        if slots
            .iter()
            .any(|slot| slot.header().has(flags::BORROWED))
        {
            return Err(PairStreamError::PayloadBorrowed);
        }

        let islands = group_slots(&slots);
        let mut relocated = Vec::with_capacity(slots.len());
        for (island, members) in islands.iter().enumerate() {
            let stream = strategy.island_stream(island);
            for &index in members {
                relocated.push((stream, slots[index].header().relocated()));
            }
        }
        drop(slots);

        let mut removed = Vec::new();
        {
            let mut streams = state.write();
            for &source in &sources {
                removed.extend(streams.headers.take_stream(source)?);
            }
            for (stream, header) in relocated {
                streams.headers.push(stream, header)?;
            }
        }
        drop(keep);
        state.retire(removed);
        state.clear_needs_islanding();
        state.invalidate();

        debug!(
            islands = islands.len(),
            pairs = islands.iter().map(Vec::len).sum::<usize>(),
            "islanded mixed pairs"
        );
        Ok(islands.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disjoint_set() {
        let mut sets = DisjointSet::new(6);
        sets.union(0, 1);
        sets.union(2, 3);
        sets.union(1, 3);
        assert_eq!(sets.find(0), sets.find(2));
        assert_ne!(sets.find(0), sets.find(4));
        assert_ne!(sets.find(4), sets.find(5));
    }
}
