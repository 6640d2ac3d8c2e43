//! # Block Arena
//!
//! A concurrent bump allocator for per-pair payloads.
//!
//! Allocations claim from the back of the current block (data grows down).
//! Individual allocations are never freed; whole blocks go away when the
//! arena is cleared, dropped, or stolen by a merge.

#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::Arc;

use super::allocator::SharedBlockAllocator;
use super::block::{Block, BlockChain, BlockEnd, TailPolicy, MIN_BLOCK_SIZE};
use crate::error::{MemoryError, MemoryResult};

/// A growable, thread-safe bump arena.
///
/// # Thread Safety
///
/// `allocate` may be called from any number of threads at once. Merging and
/// clearing need `&mut self`.
///
/// # Example
///
/// ```rust,ignore
/// let arena = BlockArena::new(16 * 1024, global_block_allocator());
///
/// // 24 bytes, 8-byte aligned, zeroed.
/// let ptr = arena.allocate_zeroed(24, 8)?.unwrap();
/// ```
#[derive(Debug)]
pub struct BlockArena {
    chain: BlockChain,
}

impl BlockArena {
    /// Creates an empty arena. Blocks are at least [`MIN_BLOCK_SIZE`] bytes.
    #[must_use]
    pub fn new(block_size: usize, allocator: SharedBlockAllocator) -> Self {
        Self {
            chain: BlockChain::new(block_size.max(MIN_BLOCK_SIZE), allocator),
        }
    }

    /// Allocates `size` bytes aligned to `align`.
    ///
    /// A zero-byte request allocates nothing and returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Fails for a non power-of-two alignment, a request larger than one block
    /// can address, or when the block allocator is out of memory.
    pub fn allocate(&self, size: usize, align: usize) -> MemoryResult<Option<NonNull<u8>>> {
        if !align.is_power_of_two() {
            return Err(MemoryError::InvalidLayout { size, align });
        }
        if size == 0 {
            return Ok(None);
        }
        self.chain.claim(BlockEnd::Back, size, align).map(Some)
    }

    /// Like [`BlockArena::allocate`], but the returned bytes are zeroed.
    ///
    /// # Errors
    ///
    /// Same as [`BlockArena::allocate`].
    pub fn allocate_zeroed(&self, size: usize, align: usize) -> MemoryResult<Option<NonNull<u8>>> {
        let ptr = self.allocate(size, align)?;
        if let Some(ptr) = ptr {
            // SAFETY: the claim owns `size` writable bytes at `ptr`.
            unsafe { ptr.as_ptr().write_bytes(0, size) };
        }
        Ok(ptr)
    }

    /// Number of blocks owned by the arena.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.chain.block_count()
    }

    /// Total bytes reserved by the arena's blocks.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.chain.reserved_bytes()
    }

    /// Checks whether the arena owns no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Snapshot of the arena's blocks.
    #[must_use]
    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.chain.blocks()
    }

    /// The allocator backing this arena.
    #[must_use]
    pub fn allocator(&self) -> &SharedBlockAllocator {
        self.chain.allocator()
    }

    /// Steals every block of `other`.
    ///
    /// If `self` is still empty it takes over `other` wholesale, current block
    /// and cursor included. Otherwise `other`'s blocks are appended and
    /// allocation continues in whichever tail block has more room.
    ///
    /// # Errors
    ///
    /// Fails if the arenas use different allocators.
    pub fn concatenate_from(&mut self, other: &mut Self) -> MemoryResult<()> {
        self.chain.append_from(&mut other.chain, TailPolicy::MostRoom)
    }

    /// Detaches every block, leaving the arena empty and reusable.
    ///
    /// Memory stays valid until the returned blocks are dropped.
    pub fn take_blocks(&mut self) -> Vec<Arc<Block>> {
        self.chain.take_blocks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::allocator::global_block_allocator;
    use std::thread;

    #[test]
    fn test_zero_size_is_noop() {
        let arena = BlockArena::new(0, global_block_allocator());
        assert_eq!(arena.allocate(0, 8).unwrap(), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn test_raw_24_bytes_roundtrip() {
        let arena = BlockArena::new(0, global_block_allocator());
        let ptr = arena.allocate_zeroed(24, 8).unwrap().unwrap();
        assert_eq!(ptr.as_ptr() as usize % 8, 0);

        let bytes: Vec<u8> = (0..24).collect();
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), 24);
            assert_eq!(std::slice::from_raw_parts(ptr.as_ptr(), 24), &bytes[..]);
        }
    }

    #[test]
    fn test_minimum_block_size() {
        let arena = BlockArena::new(128, global_block_allocator());
        arena.allocate(8, 8).unwrap();
        assert_eq!(arena.reserved_bytes(), MIN_BLOCK_SIZE);

        // A request larger than the minimum gets a block of exactly that size.
        arena.allocate(MIN_BLOCK_SIZE * 2, 16).unwrap();
        assert_eq!(arena.block_count(), 2);
        assert_eq!(arena.reserved_bytes(), MIN_BLOCK_SIZE * 3);
    }

    #[test]
    fn test_concatenate_into_empty() {
        let mut dst = BlockArena::new(0, global_block_allocator());
        let mut src = BlockArena::new(0, global_block_allocator());
        src.allocate(100, 4).unwrap();

        dst.concatenate_from(&mut src).unwrap();
        assert!(src.is_empty());
        assert_eq!(dst.block_count(), 1);

        // Keeps allocating from the transplanted block.
        dst.allocate(100, 4).unwrap();
        assert_eq!(dst.block_count(), 1);
        assert_eq!(dst.blocks()[0].back_used(), 200);
    }

    #[test]
    fn test_concurrent_allocations_do_not_overlap() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 2_000;

        let arena = BlockArena::new(0, global_block_allocator());
        let mut ranges: Vec<(usize, usize)> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|t| {
                    let arena = &arena;
                    s.spawn(move || {
                        let size = 8 + (t % 4) * 8;
                        (0..PER_THREAD)
                            .map(|_| {
                                let ptr = arena.allocate(size, 8).unwrap().unwrap();
                                (ptr.as_ptr() as usize, size)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0, "overlapping allocations");
        }
        assert_eq!(ranges.len(), THREADS * PER_THREAD);
    }
}
