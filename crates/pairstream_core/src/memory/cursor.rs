//! # Packed Dual Cursor
//!
//! Two 32-bit bump cursors packed into one `AtomicU64` so both ends of a
//! block can be claimed with a single compare-and-swap.
//!
//! ```text
//!   0                                                      capacity
//!   ├──────────────┬────────────── free ──────────────┬────────────┤
//!   │ front claims │                                  │ back claims│
//!   └──────────────┴──────────────────────────────────┴────────────┘
//!                  ▲ front (grows up)                 ▲ back (grows down)
//! ```
//!
//! The block is full when a claim would make the cursors cross.

use std::sync::atomic::{AtomicU64, Ordering};

const FRONT_MASK: u64 = 0xFFFF_FFFF;

#[inline]
const fn pack(front: u32, back: u32) -> u64 {
    ((back as u64) << 32) | (front as u64)
}

#[inline]
const fn unpack(packed: u64) -> (u32, u32) {
    ((packed & FRONT_MASK) as u32, (packed >> 32) as u32)
}

#[inline]
fn align_up(value: u32, align: u32) -> Option<u32> {
    let mask = align - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// Lock-free dual-ended bump cursor over a block of at most `u32::MAX` bytes.
///
/// # Thread Safety
///
/// Every claim is a CAS retry loop. Any number of threads may claim from
/// either end at the same time; each successful claim owns a disjoint range.
#[derive(Debug)]
pub struct PackedCursor {
    packed: AtomicU64,
}

impl PackedCursor {
    /// Creates a cursor over an empty block of `capacity` bytes.
    #[inline]
    #[must_use]
    pub const fn new(capacity: u32) -> Self {
        Self {
            packed: AtomicU64::new(pack(0, capacity)),
        }
    }

    /// Returns the current `(front, back)` offsets.
    #[inline]
    #[must_use]
    pub fn load(&self) -> (u32, u32) {
        unpack(self.packed.load(Ordering::Acquire))
    }

    /// Bytes claimed from the front.
    #[inline]
    #[must_use]
    pub fn front(&self) -> u32 {
        self.load().0
    }

    /// Offset of the lowest byte claimed from the back.
    #[inline]
    #[must_use]
    pub fn back(&self) -> u32 {
        self.load().1
    }

    /// Bytes still free between the two cursors.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> u32 {
        let (front, back) = self.load();
        back - front
    }

    /// Claims `size` bytes from the front, aligned to `align`.
    ///
    /// Returns the offset of the claimed range, or `None` if it does not fit.
    /// `align` must be a power of two.
    pub fn claim_front(&self, size: u32, align: u32) -> Option<u32> {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        let mut current = self.packed.load(Ordering::Acquire);
        loop {
            let (front, back) = unpack(current);
            let start = align_up(front, align)?;
            let end = start.checked_add(size)?;
            if end > back {
                return None;
            }
            match self.packed.compare_exchange_weak(
                current,
                pack(end, back),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(start),
                Err(actual) => current = actual,
            }
        }
    }

    /// Claims `size` bytes from the back, aligned to `align`.
    ///
    /// Returns the offset of the claimed range, or `None` if it does not fit.
    /// `align` must be a power of two.
    pub fn claim_back(&self, size: u32, align: u32) -> Option<u32> {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        let mut current = self.packed.load(Ordering::Acquire);
        loop {
            let (front, back) = unpack(current);
            let start = back.checked_sub(size)? & !(align - 1);
            if start < front {
                return None;
            }
            match self.packed.compare_exchange_weak(
                current,
                pack(front, start),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(start),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_front_and_back_meet() {
        let cursor = PackedCursor::new(64);

        assert_eq!(cursor.claim_front(16, 8), Some(0));
        assert_eq!(cursor.claim_back(16, 8), Some(48));
        assert_eq!(cursor.remaining(), 32);

        assert_eq!(cursor.claim_front(32, 1), Some(16));
        assert_eq!(cursor.claim_front(1, 1), None);
        assert_eq!(cursor.claim_back(1, 1), None);
    }

    #[test]
    fn test_alignment_padding() {
        let cursor = PackedCursor::new(128);

        assert_eq!(cursor.claim_front(3, 1), Some(0));
        // Front moves from 3 to 8 before the claim.
        assert_eq!(cursor.claim_front(8, 8), Some(8));
        assert_eq!(cursor.front(), 16);

        // Back: 128 - 5 = 123, aligned down to 112.
        assert_eq!(cursor.claim_back(5, 16), Some(112));
        assert_eq!(cursor.back(), 112);
    }

    #[test]
    fn test_oversized_claims_fail() {
        let cursor = PackedCursor::new(32);
        assert_eq!(cursor.claim_front(33, 1), None);
        assert_eq!(cursor.claim_back(33, 1), None);
        assert_eq!(cursor.load(), (0, 32));
    }

    #[test]
    fn test_concurrent_claims_are_disjoint() {
        const THREADS: usize = 8;
        const CLAIMS: usize = 256;

        let cursor = Arc::new(PackedCursor::new(u32::try_from(THREADS * CLAIMS * 8).unwrap()));
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let cursor = Arc::clone(&cursor);
                thread::spawn(move || {
                    let mut offsets = Vec::with_capacity(CLAIMS);
                    for _ in 0..CLAIMS / 2 {
                        if i % 2 == 0 {
                            offsets.push(cursor.claim_front(8, 8).unwrap());
                            offsets.push(cursor.claim_back(8, 8).unwrap());
                        } else {
                            offsets.push(cursor.claim_back(8, 8).unwrap());
                            offsets.push(cursor.claim_front(8, 8).unwrap());
                        }
                    }
                    offsets
                })
            })
            .collect();

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();

        assert_eq!(all.len(), THREADS * CLAIMS);
        assert_eq!(cursor.remaining(), 0);
    }
}
