//! # Pair Stream Error Types
//!
//! Usage errors (contract violations caught by validation) and resource
//! errors (propagated from the block allocator).

use pairstream_core::{EntityId, MemoryError};
use thiserror::Error;

/// Errors that can occur while building or consuming a pair stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairStreamError {
    /// A bucket index at or beyond the bucket count was used.
    #[error("bucket {bucket} out of range for bucket count {bucket_count}")]
    BucketOutOfRange {
        /// The offending bucket index.
        bucket: u32,
        /// Bucket count of the container, overflow bucket included.
        bucket_count: u32,
    },

    /// Concatenation between containers built for different topologies.
    #[error("topology mismatch: destination has {expected} buckets, source has {found}")]
    TopologyMismatch {
        /// Bucket count of the destination.
        expected: u32,
        /// Bucket count of the source.
        found: u32,
    },

    /// Concatenation between containers backed by different allocators.
    #[error("cannot concatenate pair streams backed by different allocators")]
    AllocatorMismatch,

    /// Typed access with a type other than the one the payload was made with.
    #[error("payload type mismatch: requested {requested}")]
    TypeMismatch {
        /// Name of the requested type.
        requested: &'static str,
    },

    /// Typed access to a payload allocated as raw bytes.
    #[error("payload is untyped; cannot access it as {requested}")]
    PayloadUntyped {
        /// Name of the requested type.
        requested: &'static str,
    },

    /// Raw access to a payload allocated as a typed value.
    #[error("payload is typed; use typed access instead of raw access")]
    PayloadTyped,

    /// The pair has no root payload.
    #[error("pair has no payload")]
    PayloadUnset,

    /// The payload is already borrowed mutably.
    #[error("payload is already borrowed")]
    PayloadBorrowed,

    /// A pair handle was used after a concatenation or islanding pass.
    #[error("stale pair handle: issued at version {issued}, container is at {current}")]
    StaleHandle {
        /// Pair-pointer version the handle was issued at.
        issued: u64,
        /// Current pair-pointer version of the container.
        current: u64,
    },

    /// An enumerator was used after the container was mutated.
    #[error("stale enumerator: issued at version {issued}, container is at {current}")]
    StaleEnumerator {
        /// Enumeration version the enumerator was issued at.
        issued: u64,
        /// Current enumeration version of the container.
        current: u64,
    },

    /// The container behind a handle was disposed.
    #[error("pair stream was disposed")]
    Disposed,

    /// Mutable access through a handle only proven safe for reading.
    #[error("{entity} is read-only in this context")]
    ReadOnlyEntity {
        /// The entity that was requested mutably.
        entity: EntityId,
    },

    /// A component lookup has no slot for the entity's index.
    #[error("{entity} has no slot in a lookup of {len} components")]
    EntityOutOfRange {
        /// The entity that was looked up.
        entity: EntityId,
        /// Number of components in the lookup.
        len: usize,
    },

    /// Invalid configuration file or value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A background job thread could not be started.
    #[error("failed to spawn job thread: {0}")]
    JobSpawn(String),

    /// Block storage failure.
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Result type for pair stream operations.
pub type PairStreamResult<T> = Result<T, PairStreamError>;
