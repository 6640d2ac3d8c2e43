//! # Object Identifiers
//!
//! Objects are identified by the host as a pair of:
//! - An index into the host's component arrays
//! - A generation counter for detecting recycled slots
//!
//! This crate never mints, recycles or frees these values. They are copied
//! into pair headers and compared for equality, nothing more.

/// Host-minted identifier of one object.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into the host's component arrays
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates a new entity ID from index and generation.
    ///
    /// # Arguments
    ///
    /// * `index` - The index into component arrays (0 to 2^32-1)
    /// * `generation` - The generation counter (0 to 2^32-1)
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Returns the index portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns the packed 64-bit representation.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Null/invalid entity ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            f.write_str("Entity(null)")
        } else {
            write!(f, "Entity({}v{})", self.index(), self.generation())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_roundtrip() {
        let id = EntityId::new(12345, 67890);
        assert_eq!(id.index(), 12345);
        assert_eq!(id.generation(), 67890);
    }

    #[test]
    fn test_generation_distinguishes_recycled_slots() {
        let old = EntityId::new(7, 1);
        let recycled = EntityId::new(7, 2);
        assert_ne!(old, recycled);
        assert_eq!(old.index(), recycled.index());
    }

    #[test]
    fn test_null_is_default() {
        assert!(EntityId::default().is_null());
        assert!(!EntityId::new(0, 0).is_null());
        assert_eq!(EntityId::NULL.to_string(), "Entity(null)");
        assert_eq!(EntityId::new(3, 9).to_string(), "Entity(3v9)");
    }
}
