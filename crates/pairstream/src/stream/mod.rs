//! # Pair Streams
//!
//! Storage, routing and handles for collected pairs.
//!
//! - `index`: which stream a pair goes to
//! - `header`: the per-pair record
//! - `container`: the [`PairStream`] itself
//! - `pair`: handles and payload guards
//! - `writer`: concurrent insertion
//! - `enumerator`: sequential consumption

mod container;
mod enumerator;
mod header;
mod index;
mod pair;
mod writer;

pub(crate) use container::StreamState;
pub use container::{PairSide, PairStream};
pub use enumerator::Enumerator;
pub(crate) use header::{flags, PairHeader};
pub use header::PayloadKind;
pub use index::{StreamIndexStrategy, StreamRoute, StreamSelection};
pub use pair::{Pair, PayloadMut};
pub use writer::{ParallelWriteKey, ParallelWriter};
