//! # Pair Handles
//!
//! A [`Pair`] is a movable handle to one stored pair. It reads and writes the
//! pair's properties, allocates payload memory in the pair's stream arena,
//! and hands out type-checked payload access.
//!
//! Handles keep the container's memory alive, but are invalidated by
//! concatenation and islanding. With validation enabled, a stale handle fails
//! fast; payload operations report [`PairStreamError::StaleHandle`] and
//! property accessors panic.

#![allow(unsafe_code)]

use std::any::type_name;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

use bytemuck::Zeroable;
use pairstream_core::{EntityId, MemoryError, MAX_BLOCK_SIZE};

use super::container::StreamState;
use super::header::{flags, type_tag, PairHeader, PayloadKind};
use crate::error::{PairStreamError, PairStreamResult};
use crate::safety::{EntityAccess, SafeEntity};
use crate::VALIDATION_ENABLED;

/// Handle to one pair in a [`PairStream`](super::PairStream).
///
/// # Panics
///
/// With validation enabled, property accessors panic when the handle is
/// stale or the container was disposed.
pub struct Pair {
    state: Arc<StreamState>,
    header: NonNull<PairHeader>,
    stream_index: usize,
    version: u64,
    safe_in_context: bool,
}

// SAFETY: every header field a handle touches is atomic or immutable, and
// the `Arc<StreamState>` keeps the header's block alive.
unsafe impl Send for Pair {}

impl Pair {
    pub(crate) fn new(
        state: Arc<StreamState>,
        header: NonNull<PairHeader>,
        stream_index: usize,
        version: u64,
        safe_in_context: bool,
    ) -> Self {
        Self {
            state,
            header,
            stream_index,
            version,
            safe_in_context,
        }
    }

    /// Header access for payload operations.
    fn checked_header(&self) -> PairStreamResult<&PairHeader> {
        if VALIDATION_ENABLED {
            self.state.check_pair_version(self.version)?;
        }
        // SAFETY: the header lives in a block owned (or retired) by `state`.
        Ok(unsafe { self.header.as_ref() })
    }

    /// Header access for property accessors.
    fn header(&self) -> &PairHeader {
        match self.checked_header() {
            Ok(header) => header,
            Err(err) => panic!("Pair handle misuse: {err}"),
        }
    }

    /// The first entity.
    #[inline]
    #[must_use]
    pub fn entity_a(&self) -> EntityId {
        self.header().entity_a()
    }

    /// The second entity.
    #[inline]
    #[must_use]
    pub fn entity_b(&self) -> EntityId {
        self.header().entity_b()
    }

    /// Whether entity a is accessed read-write.
    #[inline]
    #[must_use]
    pub fn a_is_rw(&self) -> bool {
        self.header().has(flags::A_RW)
    }

    /// Whether entity b is accessed read-write.
    #[inline]
    #[must_use]
    pub fn b_is_rw(&self) -> bool {
        self.header().has(flags::B_RW)
    }

    /// Whether the pair takes part in dispatch.
    #[inline]
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.header().is_enabled()
    }

    /// Enables or disables the pair. Disabled pairs stay stored and are
    /// still enumerated.
    #[inline]
    pub fn set_enabled(&mut self, enabled: bool) {
        self.header().set(flags::ENABLED, enabled);
    }

    /// Free user byte.
    #[inline]
    #[must_use]
    pub fn user_byte(&self) -> u8 {
        self.header().user_byte()
    }

    /// Sets the user byte.
    #[inline]
    pub fn set_user_byte(&mut self, value: u8) {
        self.header().set_user_byte(value);
    }

    /// Free user short.
    #[inline]
    #[must_use]
    pub fn user_ushort(&self) -> u16 {
        self.header().user_ushort()
    }

    /// Sets the user short.
    #[inline]
    pub fn set_user_ushort(&mut self, value: u16) {
        self.header().set_user_ushort(value);
    }

    /// Stream the pair is stored in.
    #[inline]
    #[must_use]
    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Whether this handle proves exclusive access to its read-write
    /// entities. True only for handles passed to a dispatch callback or
    /// returned by sequential insertion.
    #[inline]
    #[must_use]
    pub fn is_safe_in_context(&self) -> bool {
        self.safe_in_context
    }

    /// What the root payload is.
    #[must_use]
    pub fn payload_kind(&self) -> PayloadKind {
        self.header().payload_kind()
    }

    /// Entity a, tagged with the access this handle may grant.
    #[must_use]
    pub fn safe_entity_a(&self) -> SafeEntity {
        self.safe_entity(self.entity_a(), self.a_is_rw())
    }

    /// Entity b, tagged with the access this handle may grant.
    #[must_use]
    pub fn safe_entity_b(&self) -> SafeEntity {
        self.safe_entity(self.entity_b(), self.b_is_rw())
    }

    fn safe_entity(&self, entity: EntityId, rw: bool) -> SafeEntity {
        let access = if rw && self.safe_in_context {
            EntityAccess::ReadWrite
        } else {
            EntityAccess::ReadOnly
        };
        SafeEntity::new(entity, access)
    }

    /// Allocates `count` zeroed `T`s in the pair's stream arena.
    ///
    /// Does not touch the root payload.
    ///
    /// # Errors
    ///
    /// Fails for a stale handle or when the arena cannot grow.
    pub fn allocate<T: Zeroable + Copy + 'static>(
        &mut self,
        count: usize,
    ) -> PairStreamResult<&mut [T]> {
        self.checked_header()?;
        let size = size_of::<T>()
            .checked_mul(count)
            .ok_or(MemoryError::AllocationTooLarge {
                size: usize::MAX,
                max: MAX_BLOCK_SIZE,
            })?;
        let ptr = self
            .state
            .allocate_payload(self.stream_index, size, align_of::<T>())?
            .map_or_else(NonNull::<T>::dangling, NonNull::cast);
        // SAFETY: `count` zeroed, aligned `T`s (or a dangling pointer for
        // zero bytes), valid for as long as `self` holds the state.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), count) })
    }

    /// Allocates `size` zeroed bytes aligned to `align` in the pair's stream
    /// arena. Zero bytes allocate nothing and return `None`.
    ///
    /// # Errors
    ///
    /// Fails for a stale handle, a bad alignment, or when the arena cannot grow.
    pub fn allocate_raw(&mut self, size: usize, align: usize) -> PairStreamResult<Option<NonNull<u8>>> {
        self.checked_header()?;
        self.state.allocate_payload(self.stream_index, size, align)
    }

    /// Replaces the root payload with a fresh zeroed `T` and borrows it.
    ///
    /// The previous payload is orphaned, not freed.
    ///
    /// # Errors
    ///
    /// Fails for a stale handle, while the payload is borrowed, or when the
    /// arena cannot grow.
    pub fn replace_ref<T: Zeroable + Copy + 'static>(&mut self) -> PairStreamResult<PayloadMut<'_, T>> {
        let header = self.checked_header()?;
        if !header.try_borrow() {
            return Err(PairStreamError::PayloadBorrowed);
        }
        let value = match self.state.allocate_value::<T>(self.stream_index) {
            Ok(value) => value,
            Err(err) => {
                header.release_borrow();
                return Err(err);
            }
        };
        header.set_root(value.as_ptr().cast(), type_tag::<T>());
        // SAFETY: fresh, aligned, zeroed `T`; borrow flag taken above.
        Ok(unsafe { PayloadMut::from_raw(value, self.header) })
    }

    /// Replaces the root payload with `size` fresh zeroed bytes.
    ///
    /// A zero size clears the root. The previous payload is orphaned.
    ///
    /// # Errors
    ///
    /// Fails for a stale handle, while a typed payload is borrowed, or when
    /// the arena cannot grow.
    pub fn replace_raw(&mut self, size: usize, align: usize) -> PairStreamResult<Option<NonNull<u8>>> {
        let header = self.checked_header()?;
        if header.has(flags::BORROWED) {
            return Err(PairStreamError::PayloadBorrowed);
        }
        let root = self.state.allocate_payload(self.stream_index, size, align)?;
        header.set_root(root.map_or(std::ptr::null_mut(), NonNull::as_ptr), 0);
        Ok(root)
    }

    /// Borrows the root payload as `T`.
    ///
    /// The type tag is checked on every call, with or without validation.
    ///
    /// # Errors
    ///
    /// Fails if there is no payload, it is raw bytes, it was made as another
    /// type, or it is already borrowed.
    pub fn get_ref<T: 'static>(&self) -> PairStreamResult<PayloadMut<'_, T>> {
        let header = self.checked_header()?;
        let root = NonNull::new(header.root()).ok_or(PairStreamError::PayloadUnset)?;
        if header.has(flags::UNTYPED) {
            return Err(PairStreamError::PayloadUntyped {
                requested: type_name::<T>(),
            });
        }
        if header.root_type() != type_tag::<T>() {
            return Err(PairStreamError::TypeMismatch {
                requested: type_name::<T>(),
            });
        }
        if !header.try_borrow() {
            return Err(PairStreamError::PayloadBorrowed);
        }
        // SAFETY: the tag proves the root was allocated as a `T`; the borrow
        // flag is held by the guard.
        Ok(unsafe { PayloadMut::from_raw(root.cast(), self.header) })
    }

    /// The raw root payload pointer.
    ///
    /// # Errors
    ///
    /// Fails if there is no payload or it was allocated as a typed value.
    pub fn get_raw(&self) -> PairStreamResult<NonNull<u8>> {
        let header = self.checked_header()?;
        let root = NonNull::new(header.root()).ok_or(PairStreamError::PayloadUnset)?;
        if !header.has(flags::UNTYPED) {
            return Err(PairStreamError::PayloadTyped);
        }
        Ok(root)
    }
}

impl std::fmt::Debug for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pair")
            .field("stream_index", &self.stream_index)
            .field("version", &self.version)
            .field("safe_in_context", &self.safe_in_context)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a typed root payload.
///
/// Releases the pair's borrow flag on drop.
pub struct PayloadMut<'p, T> {
    value: NonNull<T>,
    header: NonNull<PairHeader>,
    _marker: PhantomData<&'p mut T>,
}

impl<'p, T> PayloadMut<'p, T> {
    /// # Safety
    ///
    /// `value` must point to a live `T`, the header's borrow flag must be set
    /// for this guard, and both must outlive `'p`.
    pub(crate) unsafe fn from_raw(value: NonNull<T>, header: NonNull<PairHeader>) -> Self {
        Self {
            value,
            header,
            _marker: PhantomData,
        }
    }
}

impl<T> Deref for PayloadMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: guaranteed by `from_raw`.
        unsafe { self.value.as_ref() }
    }
}

impl<T> DerefMut for PayloadMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: guaranteed by `from_raw`; the borrow flag excludes aliases.
        unsafe { self.value.as_mut() }
    }
}

impl<T> Drop for PayloadMut<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the header outlives `'p`.
        unsafe { self.header.as_ref() }.release_borrow();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PayloadMut<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PayloadMut").field(&**self).finish()
    }
}
