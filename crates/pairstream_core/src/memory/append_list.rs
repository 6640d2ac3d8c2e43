//! # Indexed Append List
//!
//! `N` independent append-only streams of fixed-size elements.
//!
//! ```text
//! stream 0: [block]─[block]─[block]
//! stream 1: [block]
//! stream 2: (empty)
//!   ...
//! ```
//!
//! Elements are claimed from the front of each stream's current block, so a
//! block holds a dense prefix of elements in claim order. Any number of
//! threads may push into the same stream concurrently; only the relative
//! order of one thread's own pushes is preserved.
//!
//! Element destructors never run. Blocks are released as raw memory.

#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::mem::{align_of, size_of, MaybeUninit};
use std::ptr::NonNull;
use std::sync::Arc;

use super::allocator::SharedBlockAllocator;
use super::block::{Block, BlockChain, BlockEnd, TailPolicy, MAX_BLOCK_SIZE};
use crate::error::{MemoryError, MemoryResult};

/// A fixed number of lock-free append-only streams.
pub struct IndexedAppendList<T> {
    streams: Box<[BlockChain]>,
    _marker: PhantomData<T>,
}

impl<T> IndexedAppendList<T> {
    /// Creates `stream_count` empty streams.
    ///
    /// # Errors
    ///
    /// Fails with [`MemoryError::AllocationTooLarge`] if `elements_per_block`
    /// elements do not fit in one block.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    pub fn new(
        stream_count: usize,
        elements_per_block: usize,
        allocator: &SharedBlockAllocator,
    ) -> MemoryResult<Self> {
        assert!(size_of::<T>() > 0, "Zero-sized elements cannot be appended");
        let block_size = elements_per_block
            .max(1)
            .checked_mul(size_of::<T>())
            .filter(|&size| size <= MAX_BLOCK_SIZE)
            .ok_or(MemoryError::AllocationTooLarge {
                size: elements_per_block.saturating_mul(size_of::<T>()),
                max: MAX_BLOCK_SIZE,
            })?;
        let streams = (0..stream_count)
            .map(|_| BlockChain::new(block_size, Arc::clone(allocator)))
            .collect();
        Ok(Self {
            streams,
            _marker: PhantomData,
        })
    }

    /// Number of streams.
    #[inline]
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    #[inline]
    fn stream(&self, index: usize) -> MemoryResult<&BlockChain> {
        self.streams.get(index).ok_or(MemoryError::StreamOutOfRange {
            index,
            stream_count: self.streams.len(),
        })
    }

    #[inline]
    fn stream_mut(&mut self, index: usize) -> MemoryResult<&mut BlockChain> {
        let stream_count = self.streams.len();
        self.streams
            .get_mut(index)
            .ok_or(MemoryError::StreamOutOfRange { index, stream_count })
    }

    /// Claims an uninitialized element slot at the end of `stream`.
    ///
    /// Safe to call concurrently for the same stream from many threads.
    ///
    /// # Errors
    ///
    /// Fails for an out-of-range stream or when the allocator fails.
    #[inline]
    pub fn allocate(&self, stream: usize) -> MemoryResult<NonNull<MaybeUninit<T>>> {
        self.stream(stream)?
            .claim(BlockEnd::Front, size_of::<T>(), align_of::<T>())
            .map(NonNull::cast)
    }

    /// Appends `value` to `stream` and returns a pointer to the stored element.
    ///
    /// # Errors
    ///
    /// Same as [`IndexedAppendList::allocate`].
    #[inline]
    pub fn push(&self, stream: usize, value: T) -> MemoryResult<NonNull<T>> {
        let slot = self.allocate(stream)?;
        // SAFETY: the slot is a fresh, exclusively claimed, aligned element.
        unsafe { slot.as_ptr().write(MaybeUninit::new(value)) };
        Ok(slot.cast())
    }

    /// Number of elements in `stream`.
    ///
    /// Counts claimed slots; only exact when no push is in flight.
    #[must_use]
    pub fn stream_len(&self, stream: usize) -> usize {
        self.streams.get(stream).map_or(0, |chain| {
            chain
                .blocks()
                .iter()
                .map(|block| block.front_used() / size_of::<T>())
                .sum()
        })
    }

    /// Number of elements across every stream.
    #[must_use]
    pub fn len(&self) -> usize {
        (0..self.streams.len()).map(|s| self.stream_len(s)).sum()
    }

    /// Checks whether every stream is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes a snapshot of `stream` for enumeration in insertion order.
    ///
    /// The snapshot holds its blocks alive and ignores elements appended
    /// after it was taken.
    ///
    /// # Errors
    ///
    /// Fails for an out-of-range stream.
    pub fn snapshot(&self, stream: usize) -> MemoryResult<StreamSnapshot<T>> {
        let blocks = self
            .stream(stream)?
            .blocks()
            .into_iter()
            .map(|block| {
                let len = block.front_used() / size_of::<T>();
                (block, len)
            })
            .filter(|(_, len)| *len > 0)
            .collect();
        Ok(StreamSnapshot {
            blocks,
            _marker: PhantomData,
        })
    }

    /// Every block of every stream.
    #[must_use]
    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.streams.iter().flat_map(BlockChain::blocks).collect()
    }

    /// Total bytes reserved by all streams.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.streams.iter().map(BlockChain::reserved_bytes).sum()
    }

    /// Appends each of `other`'s streams onto the matching stream of `self`.
    ///
    /// Runs in O(stream count + block count); no element is copied. `other`
    /// is left empty and reusable.
    ///
    /// # Errors
    ///
    /// Fails if the stream counts or allocators differ.
    pub fn concatenate_and_steal(&mut self, other: &mut Self) -> MemoryResult<()> {
        if self.streams.len() != other.streams.len() {
            return Err(MemoryError::StreamCountMismatch {
                expected: self.streams.len(),
                found: other.streams.len(),
            });
        }
        for (dst, src) in self.streams.iter_mut().zip(other.streams.iter_mut()) {
            dst.append_from(src, TailPolicy::SourceTail)?;
        }
        Ok(())
    }

    /// Detaches every block of `stream`, leaving it empty and reusable.
    ///
    /// # Errors
    ///
    /// Fails for an out-of-range stream.
    pub fn take_stream(&mut self, stream: usize) -> MemoryResult<Vec<Arc<Block>>> {
        Ok(self.stream_mut(stream)?.take_blocks())
    }
}

impl<T> std::fmt::Debug for IndexedAppendList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedAppendList")
            .field("streams", &self.streams.len())
            .field("len", &self.len())
            .finish()
    }
}

/// A frozen view of one stream's elements.
pub struct StreamSnapshot<T> {
    blocks: Vec<(Arc<Block>, usize)>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StreamSnapshot<T> {
    /// Number of elements in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.iter().map(|(_, len)| len).sum()
    }

    /// Checks whether the snapshot has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The blocks this snapshot keeps alive.
    #[must_use]
    pub fn blocks(&self) -> impl Iterator<Item = &Arc<Block>> + '_ {
        self.blocks.iter().map(|(block, _)| block)
    }
}

impl<T> IntoIterator for StreamSnapshot<T> {
    type Item = NonNull<T>;
    type IntoIter = SnapshotIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        SnapshotIter {
            blocks: self.blocks,
            block: 0,
            element: 0,
            _marker: PhantomData,
        }
    }
}

/// Owning iterator over a [`StreamSnapshot`], yielding element pointers in
/// insertion order.
///
/// Pointers stay valid while the iterator (or any other holder of the
/// blocks) is alive.
pub struct SnapshotIter<T> {
    blocks: Vec<(Arc<Block>, usize)>,
    block: usize,
    element: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SnapshotIter<T> {
    /// The blocks backing the yielded pointers.
    #[must_use]
    pub fn blocks(&self) -> impl Iterator<Item = &Arc<Block>> + '_ {
        self.blocks.iter().map(|(block, _)| block)
    }
}

impl<T> Iterator for SnapshotIter<T> {
    type Item = NonNull<T>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let (block, len) = self.blocks.get(self.block)?;
        let base = block.base().cast::<T>();
        // SAFETY: `element < len`, and the first `len` slots of the block
        // were claimed as contiguous `T`s from offset zero.
        let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(self.element)) };
        self.element += 1;
        if self.element == *len {
            self.block += 1;
            self.element = 0;
        }
        Some(ptr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.blocks[self.block.min(self.blocks.len())..]
            .iter()
            .map(|(_, len)| len)
            .sum::<usize>()
            - self.element;
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for SnapshotIter<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::allocator::{global_block_allocator, GlobalBlockAllocator};
    use std::collections::HashSet;
    use std::thread;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    struct Item {
        thread: u32,
        seq: u32,
    }

    fn read_all(list: &IndexedAppendList<Item>, stream: usize) -> Vec<Item> {
        list.snapshot(stream)
            .unwrap()
            .into_iter()
            .map(|p| unsafe { *p.as_ptr() })
            .collect()
    }

    #[test]
    fn test_single_thread_order() {
        let list = IndexedAppendList::<Item>::new(3, 4, &global_block_allocator()).unwrap();
        for seq in 0..10 {
            list.push(1, Item { thread: 0, seq }).unwrap();
        }

        assert_eq!(list.stream_len(0), 0);
        assert_eq!(list.stream_len(1), 10);
        let items = read_all(&list, 1);
        assert_eq!(items.iter().map(|i| i.seq).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_out_of_range_stream() {
        let list = IndexedAppendList::<Item>::new(2, 4, &global_block_allocator()).unwrap();
        assert_eq!(
            list.push(2, Item { thread: 0, seq: 0 }).unwrap_err(),
            MemoryError::StreamOutOfRange { index: 2, stream_count: 2 }
        );
    }

    #[test]
    fn test_snapshot_ignores_later_pushes() {
        let list = IndexedAppendList::<Item>::new(1, 4, &global_block_allocator()).unwrap();
        list.push(0, Item { thread: 0, seq: 0 }).unwrap();
        let snapshot = list.snapshot(0).unwrap();
        list.push(0, Item { thread: 0, seq: 1 }).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.into_iter().count(), 1);
    }

    #[test]
    fn test_concatenate_and_steal() {
        let mut a = IndexedAppendList::<Item>::new(2, 4, &global_block_allocator()).unwrap();
        let mut b = IndexedAppendList::<Item>::new(2, 4, &global_block_allocator()).unwrap();
        for seq in 0..3 {
            a.push(0, Item { thread: 0, seq }).unwrap();
            b.push(0, Item { thread: 1, seq }).unwrap();
            b.push(1, Item { thread: 1, seq }).unwrap();
        }

        a.concatenate_and_steal(&mut b).unwrap();
        assert_eq!(a.len(), 9);
        assert!(b.is_empty());

        // Destination elements first, then the source's.
        let threads: Vec<u32> = read_all(&a, 0).iter().map(|i| i.thread).collect();
        assert_eq!(threads, vec![0, 0, 0, 1, 1, 1]);

        // New pushes land after the merged elements.
        a.push(0, Item { thread: 2, seq: 0 }).unwrap();
        assert_eq!(read_all(&a, 0).last().unwrap().thread, 2);

        // The source is reusable.
        b.push(1, Item { thread: 3, seq: 0 }).unwrap();
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_concatenate_mismatched_streams() {
        let mut a = IndexedAppendList::<Item>::new(2, 4, &global_block_allocator()).unwrap();
        let mut b = IndexedAppendList::<Item>::new(3, 4, &global_block_allocator()).unwrap();
        assert_eq!(
            a.concatenate_and_steal(&mut b).unwrap_err(),
            MemoryError::StreamCountMismatch { expected: 2, found: 3 }
        );

        let mut c =
            IndexedAppendList::<Item>::new(2, 4, &(Arc::new(GlobalBlockAllocator) as SharedBlockAllocator)).unwrap();
        c.push(0, Item { thread: 0, seq: 0 }).unwrap();
        assert_eq!(a.concatenate_and_steal(&mut c).unwrap_err(), MemoryError::AllocatorMismatch);
    }

    #[test]
    fn test_oversized_block_rejected() {
        let allocator = global_block_allocator();
        assert!(matches!(
            IndexedAppendList::<Item>::new(2, usize::MAX / 4, &allocator),
            Err(MemoryError::AllocationTooLarge { max: MAX_BLOCK_SIZE, .. })
        ));
        assert!(matches!(
            IndexedAppendList::<Item>::new(2, MAX_BLOCK_SIZE / 8 + 1, &allocator),
            Err(MemoryError::AllocationTooLarge { .. })
        ));
        assert!(IndexedAppendList::<Item>::new(2, MAX_BLOCK_SIZE / 8, &allocator).is_ok());
    }

    #[test]
    fn test_concurrent_push_same_stream() {
        const THREADS: u32 = 8;
        const PER_THREAD: u32 = 5_000;

        let list = IndexedAppendList::<Item>::new(2, 64, &global_block_allocator()).unwrap();
        thread::scope(|s| {
            for thread in 0..THREADS {
                let list = &list;
                s.spawn(move || {
                    for seq in 0..PER_THREAD {
                        list.push(1, Item { thread, seq }).unwrap();
                    }
                });
            }
        });

        let items = read_all(&list, 1);
        assert_eq!(items.len(), (THREADS * PER_THREAD) as usize);
        let unique: HashSet<_> = items.iter().copied().collect();
        assert_eq!(unique.len(), items.len());

        // Per-thread order survives.
        for thread in 0..THREADS {
            let seqs: Vec<u32> = items.iter().filter(|i| i.thread == thread).map(|i| i.seq).collect();
            assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
