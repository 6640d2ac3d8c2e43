//! # Pair Header
//!
//! The fixed-size record stored in a stream for every pair.
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬───────────┬────────┬──────┬───────┐
//! │ entity a │ entity b │ root ptr │ root type │ ushort │ byte │ flags │
//! │   8 B    │   8 B    │   8 B    │    8 B    │  2 B   │ 1 B  │  1 B  │
//! └──────────┴──────────┴──────────┴───────────┴────────┴──────┴───────┘
//! ```
//!
//! Everything after the entities is atomic, so handles may read and write
//! the header while other pairs are appended next to it.

use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicPtr, AtomicU16, AtomicU64, AtomicU8, Ordering};

use pairstream_core::EntityId;

/// Flag bits stored in [`PairHeader`].
pub(crate) mod flags {
    /// Entity a is read-write.
    pub const A_RW: u8 = 1 << 0;
    /// Entity b is read-write.
    pub const B_RW: u8 = 1 << 1;
    /// The pair takes part in dispatch.
    pub const ENABLED: u8 = 1 << 2;
    /// The root payload was allocated as raw bytes.
    pub const UNTYPED: u8 = 1 << 3;
    /// A typed payload guard is alive.
    pub const BORROWED: u8 = 1 << 4;
}

/// What a pair's root payload is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// No payload.
    Unset,
    /// Allocated as a typed value; read with typed access.
    Typed,
    /// Allocated as raw bytes; read with raw access.
    Untyped,
}

/// Stable tag for a payload type. Never zero, since zero marks "no type".
#[must_use]
pub(crate) fn type_tag<T: 'static>() -> u64 {
    let mut hasher = DefaultHasher::new();
    TypeId::of::<T>().hash(&mut hasher);
    hasher.finish().max(1)
}

/// One stored pair.
#[repr(C)]
pub(crate) struct PairHeader {
    entity_a: EntityId,
    entity_b: EntityId,
    root: AtomicPtr<u8>,
    root_type: AtomicU64,
    user_ushort: AtomicU16,
    user_byte: AtomicU8,
    flags: AtomicU8,
}

impl PairHeader {
    /// Creates an enabled header without payload.
    pub(crate) fn new(entity_a: EntityId, a_is_rw: bool, entity_b: EntityId, b_is_rw: bool) -> Self {
        let mut bits = flags::ENABLED;
        if a_is_rw {
            bits |= flags::A_RW;
        }
        if b_is_rw {
            bits |= flags::B_RW;
        }
        Self {
            entity_a,
            entity_b,
            root: AtomicPtr::new(std::ptr::null_mut()),
            root_type: AtomicU64::new(0),
            user_ushort: AtomicU16::new(0),
            user_byte: AtomicU8::new(0),
            flags: AtomicU8::new(bits),
        }
    }

    /// Copies every field into a fresh header. Used when a pair moves to
    /// another stream; the payload itself stays where it is.
    pub(crate) fn relocated(&self) -> Self {
        Self {
            entity_a: self.entity_a,
            entity_b: self.entity_b,
            root: AtomicPtr::new(self.root.load(Ordering::Acquire)),
            root_type: AtomicU64::new(self.root_type.load(Ordering::Acquire)),
            user_ushort: AtomicU16::new(self.user_ushort.load(Ordering::Relaxed)),
            user_byte: AtomicU8::new(self.user_byte.load(Ordering::Relaxed)),
            flags: AtomicU8::new(self.flags.load(Ordering::Acquire) & !flags::BORROWED),
        }
    }

    #[inline]
    pub(crate) const fn entity_a(&self) -> EntityId {
        self.entity_a
    }

    #[inline]
    pub(crate) const fn entity_b(&self) -> EntityId {
        self.entity_b
    }

    #[inline]
    pub(crate) fn has(&self, flag: u8) -> bool {
        self.flags.load(Ordering::Acquire) & flag != 0
    }

    #[inline]
    pub(crate) fn set(&self, flag: u8, on: bool) {
        if on {
            self.flags.fetch_or(flag, Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!flag, Ordering::AcqRel);
        }
    }

    #[inline]
    pub(crate) fn is_enabled(&self) -> bool {
        self.has(flags::ENABLED)
    }

    #[inline]
    pub(crate) fn user_byte(&self) -> u8 {
        self.user_byte.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_user_byte(&self, value: u8) {
        self.user_byte.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn user_ushort(&self) -> u16 {
        self.user_ushort.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_user_ushort(&self, value: u16) {
        self.user_ushort.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn root(&self) -> *mut u8 {
        self.root.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn root_type(&self) -> u64 {
        self.root_type.load(Ordering::Acquire)
    }

    pub(crate) fn payload_kind(&self) -> PayloadKind {
        if self.root().is_null() {
            PayloadKind::Unset
        } else if self.has(flags::UNTYPED) {
            PayloadKind::Untyped
        } else {
            PayloadKind::Typed
        }
    }

    /// Installs a new root payload. `tag` is zero for raw payloads.
    pub(crate) fn set_root(&self, root: *mut u8, tag: u64) {
        self.root_type.store(tag, Ordering::Release);
        self.set(flags::UNTYPED, tag == 0 && !root.is_null());
        self.root.store(root, Ordering::Release);
    }

    /// Marks the payload borrowed. Returns false if it already was.
    #[inline]
    pub(crate) fn try_borrow(&self) -> bool {
        self.flags.fetch_or(flags::BORROWED, Ordering::AcqRel) & flags::BORROWED == 0
    }

    #[inline]
    pub(crate) fn release_borrow(&self) {
        self.set(flags::BORROWED, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> PairHeader {
        PairHeader::new(EntityId::new(1, 0), true, EntityId::new(2, 0), false)
    }

    #[test]
    fn test_header_size() {
        assert_eq!(std::mem::size_of::<PairHeader>(), 40);
    }

    #[test]
    fn test_new_header_flags() {
        let header = header();
        assert!(header.has(flags::A_RW));
        assert!(!header.has(flags::B_RW));
        assert!(header.is_enabled());
        assert_eq!(header.payload_kind(), PayloadKind::Unset);
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(type_tag::<u32>(), type_tag::<u32>());
        assert_ne!(type_tag::<u32>(), type_tag::<i32>());
        assert_ne!(type_tag::<u32>(), 0);
    }

    #[test]
    fn test_payload_kind_follows_root() {
        let header = header();
        let mut value = 7_u64;
        let ptr = std::ptr::addr_of_mut!(value).cast::<u8>();

        header.set_root(ptr, 0);
        assert_eq!(header.payload_kind(), PayloadKind::Untyped);

        header.set_root(ptr, type_tag::<u64>());
        assert_eq!(header.payload_kind(), PayloadKind::Typed);
        assert_eq!(header.root_type(), type_tag::<u64>());
    }

    #[test]
    fn test_borrow_flag() {
        let header = header();
        assert!(header.try_borrow());
        assert!(!header.try_borrow());
        header.release_borrow();
        assert!(header.try_borrow());
    }

    #[test]
    fn test_relocated_keeps_fields_but_not_borrow() {
        let header = header();
        header.set_user_byte(9);
        header.set_user_ushort(300);
        header.set(flags::ENABLED, false);
        assert!(header.try_borrow());

        let moved = header.relocated();
        assert_eq!(moved.entity_a(), EntityId::new(1, 0));
        assert_eq!(moved.user_byte(), 9);
        assert_eq!(moved.user_ushort(), 300);
        assert!(!moved.is_enabled());
        assert!(moved.try_borrow());
    }
}
