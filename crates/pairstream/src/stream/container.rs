//! # Pair Stream Container
//!
//! Owns the header streams and per-stream payload arenas of one pair stream.
//!
//! ```text
//!                ┌─────────────── StreamState (Arc) ───────────────┐
//! PairStream ──► │ RwLock<Streams>                                 │ ◄── Pair handles
//!                │   headers: IndexedAppendList<PairHeader> (2C+2) │ ◄── Enumerators
//!                │   arenas:  [BlockArena; 2C+2]                   │
//!                │ versions, routing flags, retired blocks         │
//!                └─────────────────────────────────────────────────┘
//! ```
//!
//! Inserts and payload allocations share the read lock and never contend on
//! it. Concatenation and islanding need `&mut PairStream` and take the write
//! lock, so they only wait for handles that are mid-allocation.
//!
//! Blocks moved away by a structural operation are retired into the state
//! they left while handles may still point into them, so stale handles never
//! touch freed memory.

#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Zeroable;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use pairstream_core::{
    global_block_allocator, same_allocator, Block, BlockArena, EntityId, IndexedAppendList,
    MemoryError, SharedBlockAllocator,
};
use tracing::{debug, trace};

use super::enumerator::Enumerator;
use super::header::{type_tag, PairHeader};
use super::index::{StreamIndexStrategy, StreamRoute};
use super::pair::{Pair, PayloadMut};
use super::writer::ParallelWriter;
use crate::config::{validate_bucket_count, PairStreamConfig};
use crate::error::{PairStreamError, PairStreamResult};
use crate::job::JobHandle;

/// One side of a pair: the entity, the bucket it was found in, and whether
/// the pair writes to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PairSide {
    /// The entity.
    pub entity: EntityId,
    /// Bucket the broad phase placed the entity in.
    pub bucket: u32,
    /// Whether the pair writes to the entity.
    pub read_write: bool,
}

impl PairSide {
    /// A side the pair may write to.
    #[inline]
    #[must_use]
    pub const fn read_write(entity: EntityId, bucket: u32) -> Self {
        Self {
            entity,
            bucket,
            read_write: true,
        }
    }

    /// A side the pair only reads.
    #[inline]
    #[must_use]
    pub const fn read_only(entity: EntityId, bucket: u32) -> Self {
        Self {
            entity,
            bucket,
            read_write: false,
        }
    }
}

/// Header streams and their payload arenas.
pub(crate) struct Streams {
    pub(crate) headers: IndexedAppendList<PairHeader>,
    pub(crate) arenas: Box<[BlockArena]>,
}

impl Streams {
    fn arena(&self, stream: usize) -> PairStreamResult<&BlockArena> {
        self.arenas.get(stream).ok_or(PairStreamError::Memory(MemoryError::StreamOutOfRange {
            index: stream,
            stream_count: self.arenas.len(),
        }))
    }

    fn blocks(&self) -> Vec<Arc<Block>> {
        let mut blocks = self.headers.blocks();
        blocks.extend(self.arenas.iter().flat_map(BlockArena::blocks));
        blocks
    }

    fn reserved_bytes(&self) -> usize {
        self.headers.reserved_bytes() + self.arenas.iter().map(BlockArena::reserved_bytes).sum::<usize>()
    }
}

/// State shared by a [`PairStream`] and every handle it issued.
pub(crate) struct StreamState {
    streams: RwLock<Streams>,
    strategy: StreamIndexStrategy,
    allocator: SharedBlockAllocator,
    enumeration_version: AtomicU64,
    pair_pointer_version: AtomicU64,
    needs_islanding: AtomicBool,
    needs_alias_checks: AtomicBool,
    cross_bucket_reads: AtomicBool,
    disposed: AtomicBool,
    retired: Mutex<Vec<Arc<Block>>>,
}

impl StreamState {
    #[inline]
    pub(crate) fn strategy(&self) -> StreamIndexStrategy {
        self.strategy
    }

    /// Shared access; re-entrant so handles can allocate inside a writer.
    #[inline]
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Streams> {
        self.streams.read_recursive()
    }

    #[inline]
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Streams> {
        self.streams.write()
    }

    #[inline]
    pub(crate) fn enumeration_version(&self) -> u64 {
        self.enumeration_version.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn pair_pointer_version(&self) -> u64 {
        self.pair_pointer_version.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn needs_islanding(&self) -> bool {
        self.needs_islanding.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn needs_alias_checks(&self) -> bool {
        self.needs_alias_checks.load(Ordering::Acquire)
    }

    /// Some pair reads two buckets without writing either.
    #[inline]
    pub(crate) fn has_cross_bucket_reads(&self) -> bool {
        self.cross_bucket_reads.load(Ordering::Acquire)
    }

    pub(crate) fn clear_needs_islanding(&self) {
        self.needs_islanding.store(false, Ordering::Release);
    }

    pub(crate) fn check_pair_version(&self, issued: u64) -> PairStreamResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PairStreamError::Disposed);
        }
        let current = self.pair_pointer_version();
        if issued == current {
            Ok(())
        } else {
            Err(PairStreamError::StaleHandle { issued, current })
        }
    }

    pub(crate) fn check_enumeration_version(&self, issued: u64) -> PairStreamResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PairStreamError::Disposed);
        }
        let current = self.enumeration_version();
        if issued == current {
            Ok(())
        } else {
            Err(PairStreamError::StaleEnumerator { issued, current })
        }
    }

    /// Invalidates every enumerator and pair handle.
    pub(crate) fn invalidate(&self) {
        self.enumeration_version.fetch_add(1, Ordering::AcqRel);
        self.pair_pointer_version.fetch_add(1, Ordering::AcqRel);
    }

    fn raise(flag: &AtomicBool) {
        if !flag.load(Ordering::Relaxed) {
            flag.store(true, Ordering::Release);
        }
    }

    fn note_route(&self, route: StreamRoute, a_is_rw: bool, b_is_rw: bool) {
        match route {
            StreamRoute::Mixed => Self::raise(&self.needs_islanding),
            StreamRoute::BucketA | StreamRoute::BucketB if a_is_rw != b_is_rw => {
                Self::raise(&self.needs_alias_checks);
            }
            StreamRoute::BucketA | StreamRoute::BucketB => Self::raise(&self.cross_bucket_reads),
            StreamRoute::SameBucket | StreamRoute::Invalid => {}
        }
    }

    /// Keeps `blocks` alive for outstanding handles, or drops the backlog
    /// once nothing but the container refers to this state.
    ///
    /// The backlog is only released by a call made while no handle,
    /// enumerator or island set is alive. Until then it holds every block
    /// retired by islanding and concatenation.
    pub(crate) fn retire(self: &Arc<Self>, blocks: Vec<Arc<Block>>) {
        let mut retired = self.retired.lock();
        if Arc::strong_count(self) > 1 {
            retired.extend(blocks);
        } else if !retired.is_empty() {
            trace!(blocks = retired.len(), "releasing retired blocks");
            retired.clear();
        }
    }

    /// Appends a header and returns where it went.
    fn push_header(
        &self,
        streams: &Streams,
        a: PairSide,
        b: PairSide,
    ) -> PairStreamResult<(NonNull<PairHeader>, usize)> {
        let selection = self
            .strategy
            .select(a.bucket, a.read_write, b.bucket, b.read_write)?;
        self.note_route(selection.route, a.read_write, b.read_write);
        let header = streams.headers.push(
            selection.stream,
            PairHeader::new(a.entity, a.read_write, b.entity, b.read_write),
        )?;
        self.enumeration_version.fetch_add(1, Ordering::AcqRel);
        Ok((header, selection.stream))
    }

    pub(crate) fn insert(
        self: &Arc<Self>,
        streams: &Streams,
        a: PairSide,
        b: PairSide,
        safe_in_context: bool,
    ) -> PairStreamResult<Pair> {
        let (header, stream) = self.push_header(streams, a, b)?;
        Ok(Pair::new(
            Arc::clone(self),
            header,
            stream,
            self.pair_pointer_version(),
            safe_in_context,
        ))
    }

    /// Inserts a pair whose root is a fresh zeroed `T`, borrowed by the
    /// returned guard.
    pub(crate) fn insert_typed<'s, T: Zeroable + Copy + 'static>(
        self: &'s Arc<Self>,
        streams: &Streams,
        a: PairSide,
        b: PairSide,
        safe_in_context: bool,
    ) -> PairStreamResult<(PayloadMut<'s, T>, Pair)> {
        let (header, stream) = self.push_header(streams, a, b)?;
        let value = streams
            .arena(stream)?
            .allocate_zeroed(std::mem::size_of::<T>(), std::mem::align_of::<T>())?
            .map_or_else(NonNull::<T>::dangling, NonNull::cast);
        // SAFETY: the header was just written and is not yet shared.
        let record = unsafe { header.as_ref() };
        record.try_borrow();
        record.set_root(value.as_ptr().cast(), type_tag::<T>());
        let pair = Pair::new(
            Arc::clone(self),
            header,
            stream,
            self.pair_pointer_version(),
            safe_in_context,
        );
        // SAFETY: the header and payload live in blocks owned by `self`,
        // which outlives `'s`; the borrow flag was taken above.
        let payload = unsafe { PayloadMut::from_raw(value, header) };
        Ok((payload, pair))
    }

    /// Inserts a pair whose root is `size` fresh zeroed bytes.
    pub(crate) fn insert_raw(
        self: &Arc<Self>,
        streams: &Streams,
        a: PairSide,
        b: PairSide,
        size: usize,
        align: usize,
        safe_in_context: bool,
    ) -> PairStreamResult<(Option<NonNull<u8>>, Pair)> {
        let (header, stream) = self.push_header(streams, a, b)?;
        let root = streams.arena(stream)?.allocate_zeroed(size, align)?;
        // SAFETY: the header was just written and is not yet shared.
        unsafe { header.as_ref() }.set_root(root.map_or(std::ptr::null_mut(), NonNull::as_ptr), 0);
        let pair = Pair::new(
            Arc::clone(self),
            header,
            stream,
            self.pair_pointer_version(),
            safe_in_context,
        );
        Ok((root, pair))
    }

    /// Allocates zeroed payload bytes in `stream`'s arena.
    pub(crate) fn allocate_payload(
        &self,
        stream: usize,
        size: usize,
        align: usize,
    ) -> PairStreamResult<Option<NonNull<u8>>> {
        let streams = self.read();
        Ok(streams.arena(stream)?.allocate_zeroed(size, align)?)
    }

    /// Allocates one zeroed `T` in `stream`'s arena.
    pub(crate) fn allocate_value<T: Zeroable + Copy + 'static>(
        &self,
        stream: usize,
    ) -> PairStreamResult<NonNull<T>> {
        Ok(self
            .allocate_payload(stream, std::mem::size_of::<T>(), std::mem::align_of::<T>())?
            .map_or_else(NonNull::dangling, NonNull::cast))
    }
}

/// A bucketed, concurrently fillable collection of entity pairs.
///
/// Header blocks replaced by islanding or concatenation stay allocated while
/// any [`Pair`], [`Enumerator`] or [`Islands`](crate::Islands) of this
/// container is alive. They are released by the next islanding,
/// concatenation or parallel dispatch that finds none left.
///
/// # Example
///
/// ```rust,ignore
/// let mut stream = PairStream::new(4)?;
/// let (mut contact, pair) = stream.add_pair_typed::<Contact>(
///     PairSide::read_write(a, 0),
///     PairSide::read_only(b, 0),
/// )?;
/// contact.depth = 0.25;
/// ```
pub struct PairStream {
    state: Arc<StreamState>,
}

impl PairStream {
    /// Creates a container with `bucket_count` buckets, default block sizes
    /// and the global block allocator.
    ///
    /// # Errors
    ///
    /// Fails for a bucket count of zero or one too large for the stream layout.
    pub fn new(bucket_count: u32) -> PairStreamResult<Self> {
        Self::with_allocator(bucket_count, global_block_allocator())
    }

    /// Like [`PairStream::new`], with an explicit block allocator.
    ///
    /// # Errors
    ///
    /// Same as [`PairStream::new`].
    pub fn with_allocator(bucket_count: u32, allocator: SharedBlockAllocator) -> PairStreamResult<Self> {
        let defaults = PairStreamConfig::default();
        Self::build(
            bucket_count,
            defaults.block_size_bytes,
            defaults.headers_per_block,
            allocator,
        )
    }

    /// Creates a container for the config's multibox grid.
    ///
    /// # Errors
    ///
    /// Fails if the config does not validate.
    pub fn from_config(config: &PairStreamConfig) -> PairStreamResult<Self> {
        Self::from_config_with_allocator(config, global_block_allocator())
    }

    /// Like [`PairStream::from_config`], with an explicit block allocator.
    ///
    /// # Errors
    ///
    /// Fails if the config does not validate.
    pub fn from_config_with_allocator(
        config: &PairStreamConfig,
        allocator: SharedBlockAllocator,
    ) -> PairStreamResult<Self> {
        config.validate()?;
        Self::build(
            config.multibox.bucket_count()?,
            config.block_size_bytes,
            config.headers_per_block,
            allocator,
        )
    }

    fn build(
        bucket_count: u32,
        block_size: usize,
        headers_per_block: usize,
        allocator: SharedBlockAllocator,
    ) -> PairStreamResult<Self> {
        validate_bucket_count(bucket_count)?;
        let strategy = StreamIndexStrategy::new(bucket_count);
        let stream_count = strategy.stream_count();
        let streams = Streams {
            headers: IndexedAppendList::new(stream_count, headers_per_block, &allocator)?,
            arenas: (0..stream_count)
                .map(|_| BlockArena::new(block_size, Arc::clone(&allocator)))
                .collect(),
        };
        trace!(bucket_count, stream_count, block_size, "created pair stream");
        Ok(Self {
            state: Arc::new(StreamState {
                streams: RwLock::new(streams),
                strategy,
                allocator,
                enumeration_version: AtomicU64::new(0),
                pair_pointer_version: AtomicU64::new(0),
                needs_islanding: AtomicBool::new(false),
                needs_alias_checks: AtomicBool::new(false),
                cross_bucket_reads: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                retired: Mutex::new(Vec::new()),
            }),
        })
    }

    #[inline]
    pub(crate) fn state(&self) -> &Arc<StreamState> {
        &self.state
    }

    /// The stream layout.
    #[inline]
    #[must_use]
    pub fn strategy(&self) -> StreamIndexStrategy {
        self.state.strategy
    }

    /// Number of buckets, overflow bucket included.
    #[inline]
    #[must_use]
    pub fn bucket_count(&self) -> u32 {
        self.state.strategy.bucket_count()
    }

    /// Number of streams.
    #[inline]
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.state.strategy.stream_count()
    }

    /// Index of the mixed stream.
    #[inline]
    #[must_use]
    pub fn mixed_stream_index(&self) -> usize {
        self.state.strategy.mixed_stream()
    }

    /// Whether some pair writes to entities in two different buckets.
    #[inline]
    #[must_use]
    pub fn needs_islanding(&self) -> bool {
        self.state.needs_islanding()
    }

    /// Whether some pair reads an entity that another bucket may write.
    #[inline]
    #[must_use]
    pub fn needs_alias_checks(&self) -> bool {
        self.state.needs_alias_checks()
    }

    /// Counter bumped by every insertion and structural change.
    #[inline]
    #[must_use]
    pub fn enumeration_version(&self) -> u64 {
        self.state.enumeration_version()
    }

    /// Counter bumped by every structural change that moves headers.
    #[inline]
    #[must_use]
    pub fn pair_pointer_version(&self) -> u64 {
        self.state.pair_pointer_version()
    }

    /// Number of stored pairs, disabled ones included.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.state.read().headers.len()
    }

    /// Checks whether no pair is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pair_count() == 0
    }

    /// Number of pairs stored in `stream`; zero for an out-of-range stream.
    #[must_use]
    pub fn stream_pair_count(&self, stream: usize) -> usize {
        self.state.read().headers.stream_len(stream)
    }

    /// Bytes reserved by header and payload blocks.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.state.read().reserved_bytes()
    }

    /// Stores a pair.
    ///
    /// # Errors
    ///
    /// Fails for an out-of-range bucket (with validation) or when storage
    /// cannot grow.
    pub fn add_pair(&mut self, a: PairSide, b: PairSide) -> PairStreamResult<Pair> {
        let streams = self.state.read();
        self.state.insert(&streams, a, b, true)
    }

    /// Stores a pair with a fresh zeroed `T` payload and borrows it.
    ///
    /// # Errors
    ///
    /// Same as [`PairStream::add_pair`].
    pub fn add_pair_typed<T: Zeroable + Copy + 'static>(
        &mut self,
        a: PairSide,
        b: PairSide,
    ) -> PairStreamResult<(PayloadMut<'_, T>, Pair)> {
        let streams = self.state.read();
        self.state.insert_typed(&streams, a, b, true)
    }

    /// Stores a pair with `size` fresh zeroed payload bytes.
    ///
    /// A zero size stores the pair without payload and returns `None`.
    ///
    /// # Errors
    ///
    /// Same as [`PairStream::add_pair`], plus a bad alignment.
    pub fn add_pair_raw(
        &mut self,
        a: PairSide,
        b: PairSide,
        size: usize,
        align: usize,
    ) -> PairStreamResult<(Option<NonNull<u8>>, Pair)> {
        let streams = self.state.read();
        self.state.insert_raw(&streams, a, b, size, align, true)
    }

    /// Opens a writer that can insert from many threads at once.
    ///
    /// The sequential insertion API needs `&mut self`, so it cannot be used
    /// while a writer is alive.
    #[must_use]
    pub fn parallel_writer(&self) -> ParallelWriter<'_> {
        ParallelWriter::new(&self.state)
    }

    /// Enumerates every stored pair, stream by stream, in insertion order
    /// within each stream. The handles are read-only in the sense of
    /// [`Pair::safe_entity_a`].
    #[must_use]
    pub fn enumerator(&mut self) -> Enumerator {
        Enumerator::new(Arc::clone(&self.state), false)
    }

    /// Moves every pair of `other` into `self`.
    ///
    /// Runs in O(stream count + block count); no pair is copied. `other` is
    /// left empty and reusable. Routing flags move along with the pairs, and
    /// islanded pairs of `other` make `self` need islanding again.
    /// Enumerators and pair handles of both containers become stale.
    ///
    /// # Errors
    ///
    /// Fails if the containers have different bucket counts or allocators.
    pub fn concatenate_from(&mut self, other: &mut Self) -> PairStreamResult<()> {
        let (dst, src) = (&self.state, &other.state);
        let expected = dst.strategy.bucket_count();
        let found = src.strategy.bucket_count();
        if expected != found {
            return Err(PairStreamError::TopologyMismatch { expected, found });
        }
        if !same_allocator(&dst.allocator, &src.allocator) {
            return Err(PairStreamError::AllocatorMismatch);
        }

        let moved = {
            let mut to = dst.write();
            let mut from = src.write();
            let moved = from.headers.len();
            // Islands of two containers may share entities; group them again.
            if src
                .strategy
                .island_streams()
                .any(|stream| from.headers.stream_len(stream) > 0)
            {
                StreamState::raise(&dst.needs_islanding);
            }
            src.retire(from.blocks());
            to.headers.concatenate_and_steal(&mut from.headers)?;
            for (into, outof) in to.arenas.iter_mut().zip(from.arenas.iter_mut()) {
                into.concatenate_from(outof)?;
            }
            moved
        };
        dst.retire(Vec::new());

        for (into, outof) in [
            (&dst.needs_islanding, &src.needs_islanding),
            (&dst.needs_alias_checks, &src.needs_alias_checks),
            (&dst.cross_bucket_reads, &src.cross_bucket_reads),
        ] {
            if outof.swap(false, Ordering::AcqRel) {
                into.store(true, Ordering::Release);
            }
        }
        dst.invalidate();
        src.invalidate();

        debug!(
            pairs = moved,
            needs_islanding = dst.needs_islanding(),
            needs_alias_checks = dst.needs_alias_checks(),
            "concatenated pair streams"
        );
        Ok(())
    }

    /// Releases the container now.
    ///
    /// Outstanding handles keep the memory alive but fail validation.
    pub fn dispose(self) {
        drop(self);
    }

    /// Releases the container once every job in `dependencies` has finished.
    ///
    /// The container counts as disposed immediately.
    ///
    /// # Errors
    ///
    /// Fails if the release job cannot be started; the container is then
    /// released right away.
    pub fn dispose_after(self, dependencies: &[JobHandle]) -> PairStreamResult<JobHandle> {
        self.state.disposed.store(true, Ordering::Release);
        debug!(dependencies = dependencies.len(), "deferring pair stream disposal");
        JobHandle::spawn_after(dependencies, move || drop(self))
    }
}

impl Drop for PairStream {
    fn drop(&mut self) {
        self.state.disposed.store(true, Ordering::Release);
        self.state.invalidate();
    }
}

impl std::fmt::Debug for PairStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairStream")
            .field("bucket_count", &self.bucket_count())
            .field("pair_count", &self.pair_count())
            .field("needs_islanding", &self.needs_islanding())
            .field("needs_alias_checks", &self.needs_alias_checks())
            .finish()
    }
}
