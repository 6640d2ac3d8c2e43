//! # Blocks and Block Chains
//!
//! A [`Block`] is one fixed-size allocation with a [`PackedCursor`] over it.
//! A [`BlockChain`] is a growable list of blocks with one "current" block that
//! all threads bump into.
//!
//! ## Allocation Flow
//!
//! 1. Load the current block pointer (no lock)
//! 2. CAS-claim from the requested end of that block
//! 3. On failure, take the growth lock, re-check the current block, and
//!    append a new block if nobody else already did
//!
//! Step 3 is the only place a lock is taken, and only once per block.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::allocator::{same_allocator, SharedBlockAllocator};
use super::cursor::PackedCursor;
use crate::error::{MemoryError, MemoryResult};

/// Smallest block a chain will ever allocate (16 KiB).
pub const MIN_BLOCK_SIZE: usize = 16 * 1024;

/// Base alignment of every block (one cache line).
pub const BLOCK_ALIGN: usize = 64;

/// Largest block a packed cursor can address.
pub const MAX_BLOCK_SIZE: usize = u32::MAX as usize;

/// Which end of a block a claim is taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockEnd {
    /// Claims grow upward from offset zero.
    Front,
    /// Claims grow downward from the block capacity.
    Back,
}

/// How the destination's current block is chosen when two chains merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TailPolicy {
    /// Continue in the source's current block so new claims land after every
    /// merged element. Required for ordered element lists.
    SourceTail,
    /// Continue in whichever current block has more free space.
    MostRoom,
}

/// One raw allocation plus its bump cursor.
///
/// Blocks are shared through `Arc` so memory handed out from a block stays
/// valid for as long as anyone still holds the block.
pub struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
    cursor: PackedCursor,
    allocator: SharedBlockAllocator,
}

impl Block {
    /// Allocates a new empty block.
    ///
    /// # Errors
    ///
    /// Fails if `size` exceeds [`MAX_BLOCK_SIZE`], the layout is invalid, or the
    /// allocator is out of memory.
    pub fn new(size: usize, align: usize, allocator: SharedBlockAllocator) -> MemoryResult<Self> {
        let capacity = u32::try_from(size).map_err(|_| MemoryError::AllocationTooLarge {
            size,
            max: MAX_BLOCK_SIZE,
        })?;
        let align = align.max(BLOCK_ALIGN);
        let layout = Layout::from_size_align(size, align)
            .map_err(|_| MemoryError::InvalidLayout { size, align })?;
        let ptr = allocator.allocate(layout)?;
        Ok(Self {
            ptr,
            layout,
            cursor: PackedCursor::new(capacity),
            allocator,
        })
    }

    /// Total capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Alignment of the block base address.
    #[inline]
    #[must_use]
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Base address of the block.
    #[inline]
    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Bytes claimed from the front.
    #[inline]
    #[must_use]
    pub fn front_used(&self) -> usize {
        self.cursor.front() as usize
    }

    /// Bytes claimed from the back.
    #[inline]
    #[must_use]
    pub fn back_used(&self) -> usize {
        self.capacity() - self.cursor.back() as usize
    }

    /// Bytes still free between the cursors.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.cursor.remaining() as usize
    }

    /// Claims `size` bytes aligned to `align` from one end of the block.
    ///
    /// Returns `None` when the request does not fit, including when `align`
    /// exceeds the block's base alignment.
    #[inline]
    pub fn claim(&self, end: BlockEnd, size: usize, align: usize) -> Option<NonNull<u8>> {
        if align > self.align() {
            return None;
        }
        let size = u32::try_from(size).ok()?;
        let align = u32::try_from(align).ok()?;
        let offset = match end {
            BlockEnd::Front => self.cursor.claim_front(size, align)?,
            BlockEnd::Back => self.cursor.claim_back(size, align)?,
        };
        // SAFETY: the cursor only returns offsets with offset + size <= capacity.
        Some(unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset as usize)) })
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: ptr/layout came from this allocator in `Block::new`.
        unsafe { self.allocator.deallocate(self.ptr, self.layout) }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("capacity", &self.capacity())
            .field("front_used", &self.front_used())
            .field("back_used", &self.back_used())
            .finish_non_exhaustive()
    }
}

// SAFETY: the raw memory is only reached through disjoint cursor claims.
unsafe impl Send for Block {}
// SAFETY: all shared mutation goes through the atomic cursor.
unsafe impl Sync for Block {}

/// A growable list of blocks with lock-free claims into the newest one.
pub struct BlockChain {
    /// Every block this chain owns, in allocation order.
    blocks: Mutex<Vec<Arc<Block>>>,
    /// Block new claims go to. Always null or an element of `blocks`.
    current: AtomicPtr<Block>,
    /// Size of regular (non-oversized) blocks.
    block_size: usize,
    allocator: SharedBlockAllocator,
}

impl BlockChain {
    /// Creates an empty chain. No memory is allocated until the first claim.
    #[must_use]
    pub fn new(block_size: usize, allocator: SharedBlockAllocator) -> Self {
        Self {
            blocks: Mutex::new(Vec::new()),
            current: AtomicPtr::new(ptr::null_mut()),
            block_size: block_size.clamp(1, MAX_BLOCK_SIZE),
            allocator,
        }
    }

    /// The allocator backing this chain.
    #[inline]
    #[must_use]
    pub fn allocator(&self) -> &SharedBlockAllocator {
        &self.allocator
    }

    /// Size of regular blocks.
    #[inline]
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Claims `size` bytes aligned to `align` from the given end.
    ///
    /// Lock-free unless the current block is full.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot fit in any block or the allocator fails.
    pub fn claim(&self, end: BlockEnd, size: usize, align: usize) -> MemoryResult<NonNull<u8>> {
        if !align.is_power_of_two() {
            return Err(MemoryError::InvalidLayout { size, align });
        }
        if size > MAX_BLOCK_SIZE {
            return Err(MemoryError::AllocationTooLarge {
                size,
                max: MAX_BLOCK_SIZE,
            });
        }
        loop {
            let observed = self.current.load(Ordering::Acquire);
            // SAFETY: `current` is null or points into an `Arc<Block>` held
            // by `blocks`; blocks only leave the chain through `&mut self`.
            if let Some(block) = unsafe { observed.as_ref() } {
                if let Some(ptr) = block.claim(end, size, align) {
                    return Ok(ptr);
                }
            }
            self.grow(observed, size, align)?;
        }
    }

    /// Appends a new current block unless another thread already replaced
    /// `observed`.
    #[cold]
    fn grow(&self, observed: *mut Block, size: usize, align: usize) -> MemoryResult<()> {
        let mut blocks = self.blocks.lock();
        if self.current.load(Ordering::Acquire) != observed {
            return Ok(());
        }
        let block_size = self.block_size.max(size).max(1);
        let block = Arc::new(Block::new(block_size, align, Arc::clone(&self.allocator))?);
        tracing::trace!(
            block_size,
            request = size,
            blocks = blocks.len() + 1,
            "block chain grew"
        );
        let raw = Arc::as_ptr(&block).cast_mut();
        blocks.push(block);
        self.current.store(raw, Ordering::Release);
        Ok(())
    }

    /// Returns a snapshot of the chain's blocks in allocation order.
    #[must_use]
    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.blocks.lock().clone()
    }

    /// Number of blocks in the chain.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Checks whether the chain has no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }

    /// Total bytes reserved by all blocks.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.blocks.lock().iter().map(|b| b.capacity()).sum()
    }

    /// Removes every block from the chain, leaving it empty and reusable.
    pub fn take_blocks(&mut self) -> Vec<Arc<Block>> {
        *self.current.get_mut() = ptr::null_mut();
        std::mem::take(self.blocks.get_mut())
    }

    /// Moves every block of `other` into `self` in O(1) per block.
    ///
    /// An empty destination takes over the source wholesale, including its
    /// current block. Otherwise the source's blocks are appended and `policy`
    /// picks which current block new claims continue in. `other` is left
    /// empty and reusable.
    ///
    /// # Errors
    ///
    /// Fails if the chains use different allocators.
    pub fn append_from(&mut self, other: &mut Self, policy: TailPolicy) -> MemoryResult<()> {
        if !same_allocator(&self.allocator, &other.allocator) {
            return Err(MemoryError::AllocatorMismatch);
        }
        let other_current = std::mem::replace(other.current.get_mut(), ptr::null_mut());
        let other_blocks = std::mem::take(other.blocks.get_mut());
        if other_blocks.is_empty() {
            return Ok(());
        }

        let blocks = self.blocks.get_mut();
        if blocks.is_empty() {
            *blocks = other_blocks;
            *self.current.get_mut() = other_current;
            return Ok(());
        }
        blocks.extend(other_blocks);

        let current = self.current.get_mut();
        let keep_source = match policy {
            TailPolicy::SourceTail => true,
            TailPolicy::MostRoom => {
                // SAFETY: both pointers are null or point at blocks now owned
                // by `self.blocks`, and we hold `&mut self`.
                let ours = unsafe { (*current).as_ref() }.map_or(0, Block::remaining);
                let theirs = unsafe { other_current.as_ref() }.map_or(0, Block::remaining);
                theirs > ours
            }
        };
        if keep_source {
            *current = other_current;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BlockChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockChain")
            .field("block_size", &self.block_size)
            .field("blocks", &self.block_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::allocator::{global_block_allocator, BlockAllocator, GlobalBlockAllocator};
    use std::sync::atomic::AtomicUsize;

    /// Tracks live bytes so tests can observe when blocks are freed.
    #[derive(Default)]
    struct CountingAllocator {
        live: AtomicUsize,
    }

    impl BlockAllocator for CountingAllocator {
        fn allocate(&self, layout: Layout) -> MemoryResult<NonNull<u8>> {
            let ptr = GlobalBlockAllocator.allocate(layout)?;
            self.live.fetch_add(layout.size(), Ordering::SeqCst);
            Ok(ptr)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.live.fetch_sub(layout.size(), Ordering::SeqCst);
            GlobalBlockAllocator.deallocate(ptr, layout);
        }
    }

    #[test]
    fn test_claims_grow_the_chain() {
        let chain = BlockChain::new(64, global_block_allocator());
        assert!(chain.is_empty());

        for _ in 0..8 {
            chain.claim(BlockEnd::Front, 16, 8).unwrap();
        }
        assert_eq!(chain.block_count(), 2);
        assert_eq!(chain.reserved_bytes(), 128);
    }

    #[test]
    fn test_oversized_request_gets_its_own_block() {
        let chain = BlockChain::new(64, global_block_allocator());
        let ptr = chain.claim(BlockEnd::Back, 1000, 8).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 8, 0);
        assert_eq!(chain.blocks()[0].capacity(), 1000);
    }

    #[test]
    fn test_large_alignment_respected() {
        let chain = BlockChain::new(256, global_block_allocator());
        chain.claim(BlockEnd::Front, 3, 1).unwrap();
        let ptr = chain.claim(BlockEnd::Front, 16, 256).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 256, 0);
    }

    #[test]
    fn test_invalid_alignment_rejected() {
        let chain = BlockChain::new(256, global_block_allocator());
        assert_eq!(
            chain.claim(BlockEnd::Front, 8, 3).unwrap_err(),
            MemoryError::InvalidLayout { size: 8, align: 3 }
        );
    }

    #[test]
    fn test_append_into_empty_transplants_tail() {
        let mut dst = BlockChain::new(128, global_block_allocator());
        let mut src = BlockChain::new(128, global_block_allocator());
        src.claim(BlockEnd::Front, 32, 8).unwrap();

        dst.append_from(&mut src, TailPolicy::SourceTail).unwrap();
        assert!(src.is_empty());
        assert_eq!(dst.block_count(), 1);

        // The transplanted tail keeps bumping where the source left off.
        dst.claim(BlockEnd::Front, 32, 8).unwrap();
        assert_eq!(dst.block_count(), 1);
        assert_eq!(dst.blocks()[0].front_used(), 64);
    }

    #[test]
    fn test_append_most_room_keeps_roomier_tail() {
        let mut dst = BlockChain::new(128, global_block_allocator());
        let mut src = BlockChain::new(128, global_block_allocator());
        dst.claim(BlockEnd::Back, 120, 8).unwrap();
        src.claim(BlockEnd::Back, 8, 8).unwrap();

        dst.append_from(&mut src, TailPolicy::MostRoom).unwrap();
        dst.claim(BlockEnd::Back, 64, 8).unwrap();
        assert_eq!(dst.block_count(), 2);
        assert_eq!(dst.blocks()[1].back_used(), 72);
    }

    #[test]
    fn test_append_rejects_foreign_allocator() {
        let mut dst = BlockChain::new(128, global_block_allocator());
        let mut src = BlockChain::new(128, Arc::new(GlobalBlockAllocator));
        assert_eq!(
            dst.append_from(&mut src, TailPolicy::SourceTail).unwrap_err(),
            MemoryError::AllocatorMismatch
        );
    }

    #[test]
    fn test_blocks_freed_with_last_reference() {
        let counting = Arc::new(CountingAllocator::default());
        let allocator: SharedBlockAllocator = counting.clone();
        let mut chain = BlockChain::new(256, allocator);
        chain.claim(BlockEnd::Front, 8, 8).unwrap();
        assert_eq!(counting.live.load(Ordering::SeqCst), 256);

        let kept = chain.take_blocks();
        drop(chain);
        assert_eq!(counting.live.load(Ordering::SeqCst), 256);

        drop(kept);
        assert_eq!(counting.live.load(Ordering::SeqCst), 0);
    }
}
