//! # PAIRSTREAM Core
//!
//! Lock-free storage primitives for collecting interaction pairs from many
//! threads at once:
//! - Object identifiers (host-minted, never owned here)
//! - A packed dual cursor for CAS-only bump allocation
//! - Block arenas for payload bytes
//! - Indexed append lists for fixed-size records
//!
//! ## Architecture Rules
//!
//! 1. **No locks on the claim path** - only block growth takes a lock
//! 2. **No per-element frees** - memory is released a whole block at a time
//! 3. **Merges are O(blocks)** - storage moves by pointer, never by copy
//!
//! ## Example
//!
//! ```rust,ignore
//! use pairstream_core::{global_block_allocator, IndexedAppendList};
//!
//! let list = IndexedAppendList::<u64>::new(4, 256, &global_block_allocator())?;
//! list.push(2, 42)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod entity;
pub mod error;
pub mod memory;

pub use entity::EntityId;
pub use error::{MemoryError, MemoryResult};
pub use memory::{
    global_block_allocator, same_allocator, Block, BlockAllocator, BlockArena, BlockChain,
    BlockEnd, GlobalBlockAllocator, IndexedAppendList, PackedCursor, SharedBlockAllocator,
    SnapshotIter, StreamSnapshot, TailPolicy, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE,
};
