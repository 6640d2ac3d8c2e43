//! # Memory Management
//!
//! Block-based storage that many threads can append to at once.
//!
//! ## Layers
//!
//! - [`PackedCursor`] - two bump cursors in one atomic word
//! - [`Block`] / [`BlockChain`] - fixed allocations, grown on demand
//! - [`BlockArena`] - raw payload bytes, claimed from the back of blocks
//! - [`IndexedAppendList`] - N element streams, claimed from the front
//!
//! Nothing is freed piecemeal. Blocks are released whole, and only once the
//! last `Arc` holding them is dropped.

mod allocator;
mod append_list;
mod arena;
mod block;
mod cursor;

pub use allocator::{
    global_block_allocator, same_allocator, BlockAllocator, GlobalBlockAllocator,
    SharedBlockAllocator,
};
pub use append_list::{IndexedAppendList, SnapshotIter, StreamSnapshot};
pub use arena::BlockArena;
pub use block::{Block, BlockChain, BlockEnd, TailPolicy, BLOCK_ALIGN, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use cursor::PackedCursor;
