//! # Safe Entity Access
//!
//! A [`SafeEntity`] can only be minted by a [`Pair`](crate::Pair) handle and
//! carries the access that handle may grant. A [`SafeComponentLookup`] keys
//! component storage by safe entities, so mutable access is only handed out
//! for entities proven read-write in the current context.
//!
//! ```text
//! dispatch ──► Pair (safe in context) ──► SafeEntity(RW) ──► &mut Component
//! writer   ──► Pair (not safe)        ──► SafeEntity(RO) ──► &Component
//! ```

#![allow(unsafe_code)]

use std::marker::PhantomData;
use std::ptr::NonNull;

use pairstream_core::EntityId;

use crate::error::{PairStreamError, PairStreamResult};

/// Access granted through a [`SafeEntity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityAccess {
    /// Shared reads only.
    ReadOnly,
    /// Exclusive writes.
    ReadWrite,
}

/// An entity tagged with the access the issuing pair may grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SafeEntity {
    entity: EntityId,
    access: EntityAccess,
}

impl SafeEntity {
    pub(crate) const fn new(entity: EntityId, access: EntityAccess) -> Self {
        Self { entity, access }
    }

    /// The wrapped entity.
    #[inline]
    #[must_use]
    pub const fn entity(self) -> EntityId {
        self.entity
    }

    /// The granted access.
    #[inline]
    #[must_use]
    pub const fn access(self) -> EntityAccess {
        self.access
    }

    /// Whether the entity may be written.
    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self.access, EntityAccess::ReadWrite)
    }

    /// Returns the entity if it may be written.
    ///
    /// # Errors
    ///
    /// Returns [`PairStreamError::ReadOnlyEntity`] for read-only access.
    pub const fn require_write(self) -> PairStreamResult<EntityId> {
        if self.is_writable() {
            Ok(self.entity)
        } else {
            Err(PairStreamError::ReadOnlyEntity {
                entity: self.entity,
            })
        }
    }
}

impl From<SafeEntity> for EntityId {
    fn from(safe: SafeEntity) -> Self {
        safe.entity
    }
}

/// Component storage indexed by entity index, accessed through
/// [`SafeEntity`] keys.
///
/// Shares one `&mut [T]` between worker threads. Exclusive access per
/// component comes from the dispatch order: two pairs that write the same
/// entity never run at the same time.
pub struct SafeComponentLookup<'a, T> {
    data: NonNull<T>,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

// SAFETY: behaves like `&mut [T]` for sending.
unsafe impl<T: Send> Send for SafeComponentLookup<'_, T> {}
// SAFETY: shared use hands out `&T` freely and `&mut T` only through the
// unsafe `get_mut`, whose caller guarantees exclusivity.
unsafe impl<T: Send + Sync> Sync for SafeComponentLookup<'_, T> {}

impl<'a, T> SafeComponentLookup<'a, T> {
    /// Wraps component storage; entity index `i` maps to `components[i]`.
    #[must_use]
    pub fn new(components: &'a mut [T]) -> Self {
        Self {
            len: components.len(),
            // SAFETY: slice pointers are never null.
            data: unsafe { NonNull::new_unchecked(components.as_mut_ptr()) },
            _marker: PhantomData,
        }
    }

    /// Number of components.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks whether the lookup is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn slot(&self, entity: EntityId) -> PairStreamResult<NonNull<T>> {
        let index = entity.index() as usize;
        if index >= self.len {
            return Err(PairStreamError::EntityOutOfRange {
                entity,
                len: self.len,
            });
        }
        // SAFETY: `index < len`.
        Ok(unsafe { NonNull::new_unchecked(self.data.as_ptr().add(index)) })
    }

    /// Reads a component. Any access level may read.
    #[must_use]
    pub fn get(&self, entity: SafeEntity) -> Option<&T> {
        // SAFETY: in bounds; writers to this entity are excluded by dispatch.
        self.slot(entity.entity).ok().map(|slot| unsafe { slot.as_ref() })
    }

    /// Writes a component through exclusive access to the whole lookup.
    ///
    /// # Errors
    ///
    /// Fails for read-only access or an index outside the storage.
    pub fn get_mut_exclusive(&mut self, entity: SafeEntity) -> PairStreamResult<&mut T> {
        let slot = self.slot(entity.require_write()?)?;
        // SAFETY: in bounds, and `&mut self` excludes every other access.
        Ok(unsafe { &mut *slot.as_ptr() })
    }

    /// Writes a component through a shared lookup.
    ///
    /// # Errors
    ///
    /// Fails for read-only access or an index outside the storage.
    ///
    /// # Safety
    ///
    /// No other reference to the same component may exist while the result
    /// is alive. Dispatch guarantees this for read-write entities of pairs
    /// handed to the callback.
    pub unsafe fn get_mut(&self, entity: SafeEntity) -> PairStreamResult<&mut T> {
        let slot = self.slot(entity.require_write()?)?;
        Ok(&mut *slot.as_ptr())
    }
}

impl<T> std::fmt::Debug for SafeComponentLookup<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeComponentLookup")
            .field("len", &self.len)
            .finish()
    }
}
