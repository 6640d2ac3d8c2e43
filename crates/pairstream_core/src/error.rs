//! # Memory Error Types
//!
//! Resource errors raised by blocks, arenas and append lists.

use thiserror::Error;

/// Errors that can occur while carving memory out of blocks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The block allocator could not satisfy a request.
    #[error("block allocation failed: {size} bytes aligned to {align}")]
    AllocationFailed {
        /// Requested block size in bytes.
        size: usize,
        /// Requested block alignment in bytes.
        align: usize,
    },

    /// A single request exceeds what one block can address.
    #[error("allocation of {size} bytes exceeds the {max} byte block limit")]
    AllocationTooLarge {
        /// Requested size in bytes.
        size: usize,
        /// Largest addressable block size.
        max: usize,
    },

    /// Size and alignment do not form a valid layout.
    #[error("invalid layout: {size} bytes aligned to {align}")]
    InvalidLayout {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// A stream index outside `0..stream_count` was used.
    #[error("stream index {index} out of range for {stream_count} streams")]
    StreamOutOfRange {
        /// The offending stream index.
        index: usize,
        /// Number of streams in the list.
        stream_count: usize,
    },

    /// Two arenas or lists backed by different allocators were merged.
    #[error("cannot merge storage backed by different block allocators")]
    AllocatorMismatch,

    /// Two indexed lists with different stream counts were merged.
    #[error("stream count mismatch: expected {expected}, found {found}")]
    StreamCountMismatch {
        /// Stream count of the destination.
        expected: usize,
        /// Stream count of the source.
        found: usize,
    },
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
