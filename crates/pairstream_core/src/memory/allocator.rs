//! # Block Allocators
//!
//! The source of raw memory for every block. Containers only merge when they
//! share the same allocator instance.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

use crate::error::{MemoryError, MemoryResult};

/// Anything able to hand out and take back raw byte ranges.
pub trait BlockAllocator: Send + Sync {
    /// Allocates a block for `layout`. The size is never zero.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::AllocationFailed`] when memory is exhausted.
    fn allocate(&self, layout: Layout) -> MemoryResult<NonNull<u8>>;

    /// Returns a block previously produced by [`BlockAllocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same
    /// `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Shared handle to a block allocator.
pub type SharedBlockAllocator = Arc<dyn BlockAllocator>;

/// Block allocator backed by the process-wide global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalBlockAllocator;

impl BlockAllocator for GlobalBlockAllocator {
    fn allocate(&self, layout: Layout) -> MemoryResult<NonNull<u8>> {
        if layout.size() == 0 {
            return Err(MemoryError::InvalidLayout {
                size: 0,
                align: layout.align(),
            });
        }
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(MemoryError::AllocationFailed {
            size: layout.size(),
            align: layout.align(),
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded from the caller's contract.
        std::alloc::dealloc(ptr.as_ptr(), layout);
    }
}

/// Returns the shared global allocator instance.
///
/// Every call returns the same `Arc`, so storage built from it can be merged.
#[must_use]
pub fn global_block_allocator() -> SharedBlockAllocator {
    static GLOBAL: OnceLock<SharedBlockAllocator> = OnceLock::new();
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(GlobalBlockAllocator)))
}

/// Checks whether two handles refer to the same allocator instance.
#[inline]
#[must_use]
pub fn same_allocator(a: &SharedBlockAllocator, b: &SharedBlockAllocator) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_allocator_is_shared() {
        let a = global_block_allocator();
        let b = global_block_allocator();
        assert!(same_allocator(&a, &b));

        let other: SharedBlockAllocator = Arc::new(GlobalBlockAllocator);
        assert!(!same_allocator(&a, &other));
    }

    #[test]
    fn test_zero_sized_layout_rejected() {
        let layout = Layout::from_size_align(0, 8).unwrap();
        let err = GlobalBlockAllocator.allocate(layout).unwrap_err();
        assert_eq!(err, MemoryError::InvalidLayout { size: 0, align: 8 });
    }

    #[test]
    fn test_allocate_and_free() {
        let layout = Layout::from_size_align(256, 64).unwrap();
        let ptr = GlobalBlockAllocator.allocate(layout).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 64, 0);
        unsafe { GlobalBlockAllocator.deallocate(ptr, layout) };
    }
}
