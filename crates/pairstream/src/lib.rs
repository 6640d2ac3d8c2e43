//! # Pairstream
//!
//! Concurrent collection and consumption of entity pairs.
//!
//! A broad phase sorts entities into buckets and emits pairs of entities
//! that may interact. Each pair says, per side, whether it reads or writes
//! that entity. The pair stream stores pairs from many threads without locks,
//! routes them so that pairs touching disjoint entities end up in different
//! streams, and later hands them to workers in an order that never lets two
//! threads write the same entity.
//!
//! ```text
//! broad phase ──► ParallelWriter ──► PairStream ──► dispatch ──► workers
//!   (threads)      (lock-free)        2C+2 streams   (islands)    (threads)
//! ```
//!
//! ## Validation
//!
//! Usage checks (stale handles, stale enumerators, out-of-range buckets,
//! disposed containers) are on in debug builds and with the `validation`
//! feature. Payload type tags are always checked.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod access_mask;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod islands;
pub mod job;
pub mod safety;
pub mod stream;

pub use access_mask::{AccessMask, CategoryIndex, CategoryLookup};
pub use config::{MultiBoxConfig, PairStreamConfig};
pub use dispatch::DispatchStrategy;
pub use error::{PairStreamError, PairStreamResult};
pub use islands::Islands;
pub use job::{JobCompletion, JobHandle};
pub use safety::{EntityAccess, SafeComponentLookup, SafeEntity};
pub use stream::{
    Enumerator, Pair, PairSide, PairStream, ParallelWriteKey, ParallelWriter, PayloadKind,
    PayloadMut, StreamIndexStrategy, StreamRoute, StreamSelection,
};

pub use pairstream_core::{global_block_allocator, EntityId, SharedBlockAllocator};

/// Whether usage checks are compiled in.
pub const VALIDATION_ENABLED: bool = cfg!(any(debug_assertions, feature = "validation"));
