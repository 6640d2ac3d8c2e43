//! # Access Masks
//!
//! A compact set of accepted category indices, built fresh per parallel task
//! to filter which entities a callback may touch.
//!
//! ```text
//! all indices < 128   ──► Bits(u128)      one AND per test
//! up to 8 indices     ──► Inline([u32;8]) sorted, no allocation
//! more                ──► Spilled(Box)    sorted, binary search
//! ```

use pairstream_core::EntityId;

/// Index of an entity category (archetype, layer, material...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryIndex(pub u32);

/// Resolves an entity to its category.
pub trait CategoryLookup {
    /// Category of `entity`, or `None` if it has none.
    fn category_of(&self, entity: EntityId) -> Option<CategoryIndex>;
}

impl<F> CategoryLookup for F
where
    F: Fn(EntityId) -> Option<CategoryIndex>,
{
    fn category_of(&self, entity: EntityId) -> Option<CategoryIndex> {
        self(entity)
    }
}

const BIT_CAPACITY: u32 = 128;

/// Most large indices a mask stores without allocating.
pub const INLINE_CAPACITY: usize = 8;

/// Set of accepted categories.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccessMask {
    /// Every accepted index is below 128.
    Bits(u128),
    /// At most eight sorted indices.
    Inline {
        /// Number of used entries.
        len: u8,
        /// Sorted indices; entries past `len` are zero.
        items: [u32; INLINE_CAPACITY],
    },
    /// Sorted indices on the heap.
    Spilled(Box<[u32]>),
}

impl Default for AccessMask {
    fn default() -> Self {
        Self::empty()
    }
}

impl AccessMask {
    /// A mask accepting nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Bits(0)
    }

    /// A mask accepting exactly `categories`.
    #[must_use]
    pub fn from_categories<I>(categories: I) -> Self
    where
        I: IntoIterator<Item = CategoryIndex>,
    {
        let mut indices: Vec<u32> = categories.into_iter().map(|c| c.0).collect();
        indices.sort_unstable();
        indices.dedup();

        if indices.last().map_or(true, |&max| max < BIT_CAPACITY) {
            return Self::Bits(indices.iter().fold(0, |bits, &i| bits | (1_u128 << i)));
        }
        if indices.len() <= INLINE_CAPACITY {
            let mut items = [0; INLINE_CAPACITY];
            items[..indices.len()].copy_from_slice(&indices);
            return Self::Inline {
                len: u8::try_from(indices.len()).unwrap_or(u8::MAX),
                items,
            };
        }
        Self::Spilled(indices.into_boxed_slice())
    }

    /// A mask accepting every category in `categories` that `predicate`
    /// accepts.
    #[must_use]
    pub fn from_predicate<I, P>(categories: I, mut predicate: P) -> Self
    where
        I: IntoIterator<Item = CategoryIndex>,
        P: FnMut(CategoryIndex) -> bool,
    {
        Self::from_categories(categories.into_iter().filter(|&c| predicate(c)))
    }

    /// Whether `category` is accepted.
    #[inline]
    #[must_use]
    pub fn contains(&self, category: CategoryIndex) -> bool {
        match self {
            Self::Bits(bits) => category.0 < BIT_CAPACITY && bits & (1_u128 << category.0) != 0,
            Self::Inline { len, items } => items[..usize::from(*len)].binary_search(&category.0).is_ok(),
            Self::Spilled(items) => items.binary_search(&category.0).is_ok(),
        }
    }

    /// Whether `entity`'s category is accepted. Entities without a category
    /// never match.
    #[inline]
    #[must_use]
    pub fn matches<L: CategoryLookup + ?Sized>(&self, entity: EntityId, lookup: &L) -> bool {
        lookup
            .category_of(entity)
            .is_some_and(|category| self.contains(category))
    }

    /// Number of accepted categories.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bits(bits) => bits.count_ones() as usize,
            Self::Inline { len, .. } => usize::from(*len),
            Self::Spilled(items) => items.len(),
        }
    }

    /// Whether nothing is accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accepted categories in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = CategoryIndex> + '_ {
        let (bits, items): (u128, &[u32]) = match self {
            Self::Bits(bits) => (*bits, &[][..]),
            Self::Inline { len, items } => (0, &items[..usize::from(*len)]),
            Self::Spilled(items) => (0, &items[..]),
        };
        (0..BIT_CAPACITY)
            .filter(move |&i| bits & (1_u128 << i) != 0)
            .chain(items.iter().copied())
            .map(CategoryIndex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories(indices: &[u32]) -> Vec<CategoryIndex> {
        indices.iter().copied().map(CategoryIndex).collect()
    }

    #[test]
    fn test_small_indices_use_bits() {
        let mask = AccessMask::from_categories(categories(&[0, 5, 127, 5]));
        assert!(matches!(mask, AccessMask::Bits(_)));
        assert_eq!(mask.len(), 3);
        assert!(mask.contains(CategoryIndex(127)));
        assert!(!mask.contains(CategoryIndex(6)));
        assert!(!mask.contains(CategoryIndex(500)));
    }

    #[test]
    fn test_large_indices_inline_then_spill() {
        let inline = AccessMask::from_categories(categories(&[900, 3, 200]));
        assert!(matches!(inline, AccessMask::Inline { len: 3, .. }));
        assert!(inline.contains(CategoryIndex(200)));
        assert!(inline.contains(CategoryIndex(3)));
        assert!(!inline.contains(CategoryIndex(4)));

        let many: Vec<u32> = (0..20).map(|i| i * 100).collect();
        let spilled = AccessMask::from_categories(categories(&many));
        assert!(matches!(spilled, AccessMask::Spilled(_)));
        assert_eq!(spilled.len(), 20);
        assert!(spilled.contains(CategoryIndex(1900)));
        assert!(!spilled.contains(CategoryIndex(1901)));
    }

    #[test]
    fn test_from_predicate() {
        let mask = AccessMask::from_predicate(categories(&[1, 2, 3, 4, 300]), |c| c.0 % 2 == 0);
        assert_eq!(
            mask.iter().collect::<Vec<_>>(),
            categories(&[2, 4, 300])
        );
    }

    #[test]
    fn test_matches_entity() {
        let mask = AccessMask::from_categories(categories(&[2]));
        let lookup = |entity: EntityId| (entity.index() < 10).then(|| CategoryIndex(entity.index() % 3));

        assert!(mask.matches(EntityId::new(2, 0), &lookup));
        assert!(mask.matches(EntityId::new(5, 0), &lookup));
        assert!(!mask.matches(EntityId::new(4, 0), &lookup));
        assert!(!mask.matches(EntityId::new(11, 0), &lookup));
    }

    #[test]
    fn test_empty() {
        let mask = AccessMask::default();
        assert!(mask.is_empty());
        assert_eq!(mask.iter().count(), 0);
        assert!(!mask.contains(CategoryIndex(0)));
    }
}
