//! # Packed time-zone index sets
//!
//! A time-zone index is a 1-based `u16` naming an entry of the per-tree id
//! table; `0` means "no time zone" (ocean). Leaves carry at most two indices
//! packed into a `u32`; the build and consolidation phases use wider
//! variants with the same insertion-order-preserving `add` semantics.
//!
//! All three types keep duplicates out without allocating and fill their
//! slots strictly left to right, so an all-zero tail always marks the end of
//! the set.

use bitfield_struct::bitfield;

/// The leaf payload: up to two packed 1-based time-zone indices.
///
/// Invariants: `first() > 0` or the whole value is zero, and `second() != 0`
/// implies `first() != 0`. The builder maintains these through [`add`];
/// the codec re-validates them when reading untrusted bytes.
///
/// [`add`]: TimeZoneIndex::add
#[bitfield(u32)]
#[derive(PartialEq, Eq, Hash)]
pub struct TimeZoneIndex {
    pub first: u16,
    pub second: u16,
}

impl TimeZoneIndex {
    /// The empty set, i.e. an ocean leaf.
    pub const EMPTY: Self = Self::new();

    /// A single-entry set.
    pub const fn single(index: u16) -> Self {
        Self::new().with_first(index)
    }

    /// A two-entry set; callers are responsible for `first != second`.
    pub const fn pair(first: u16, second: u16) -> Self {
        Self::new().with_first(first).with_second(second)
    }

    /// Absorbs an index into the first free slot.
    ///
    /// Returns `true` when the index was stored or already present and
    /// `false` when both slots hold other indices. Adding `0` is a no-op
    /// reported as absorbed.
    pub fn add(&mut self, index: u16) -> bool {
        if index == 0 || self.first() == index || self.second() == index {
            return true;
        }
        if self.first() == 0 {
            self.set_first(index);
            true
        } else if self.second() == 0 {
            self.set_second(index);
            true
        } else {
            false
        }
    }

    pub fn contains(self, index: u16) -> bool {
        index != 0 && (self.first() == index || self.second() == index)
    }

    pub fn len(self) -> usize {
        if self.first() == 0 {
            0
        } else if self.second() == 0 {
            1
        } else {
            2
        }
    }

    pub fn is_empty(self) -> bool {
        self.first() == 0
    }

    /// The entries in slot order, zeros skipped.
    pub fn iter(self) -> impl Iterator<Item = u16> {
        [self.first(), self.second()].into_iter().filter(|&i| i != 0)
    }

    /// Canonical slot order: ascending when both slots are occupied.
    ///
    /// Slot order otherwise depends on claim order, which depends on thread
    /// scheduling during the build; the consolidator normalizes every leaf
    /// through this before the tree is serialized.
    #[must_use]
    pub fn normalized(self) -> Self {
        if self.second() != 0 && self.first() > self.second() {
            Self::pair(self.second(), self.first())
        } else {
            self
        }
    }
}

macro_rules! wide_index_set {
    ($(#[$attr:meta])* $name:ident, $raw:ty, $slots:expr) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($raw);

        impl $name {
            pub const SLOTS: usize = $slots;
            pub const EMPTY: Self = Self(0);

            #[allow(clippy::cast_possible_truncation)]
            fn slot(self, i: usize) -> u16 {
                (self.0 >> (16 * i)) as u16
            }

            /// Absorbs an index into the first free slot; same contract as
            /// [`TimeZoneIndex::add`].
            pub fn add(&mut self, index: u16) -> bool {
                if index == 0 {
                    return true;
                }
                for i in 0..Self::SLOTS {
                    let current = self.slot(i);
                    if current == index {
                        return true;
                    }
                    if current == 0 {
                        self.0 |= <$raw>::from(index) << (16 * i);
                        return true;
                    }
                }
                false
            }

            pub fn contains(self, index: u16) -> bool {
                index != 0 && self.iter().any(|i| i == index)
            }

            pub fn len(self) -> usize {
                self.iter().count()
            }

            pub fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// The entries in insertion order.
            pub fn iter(self) -> impl Iterator<Item = u16> {
                (0..Self::SLOTS).map(move |i| self.slot(i)).take_while(|&i| i != 0)
            }
        }

        impl From<TimeZoneIndex> for $name {
            fn from(value: TimeZoneIndex) -> Self {
                let mut set = Self::EMPTY;
                for index in value.iter() {
                    set.add(index);
                }
                set
            }
        }
    };
}

wide_index_set!(
    /// Four-slot overflow set used by the builder's side table when a node
    /// accumulates more overlap candidates than a leaf payload can hold.
    TimeZoneIndex2,
    u64,
    4
);

wide_index_set!(
    /// Eight-slot candidate set carried down the tree by the consolidator;
    /// the union of a node's payload, its side-table entry, and everything
    /// inherited from its ancestors.
    TimeZoneIndex8,
    u128,
    8
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_fills_slots_in_order() {
        let mut index = TimeZoneIndex::EMPTY;
        assert!(index.add(7));
        assert!(index.add(3));
        assert_eq!(index.first(), 7);
        assert_eq!(index.second(), 3);
    }

    #[test]
    fn add_rejects_a_third_entry() {
        let mut index = TimeZoneIndex::pair(1, 2);
        assert!(!index.add(3));
        assert_eq!(index, TimeZoneIndex::pair(1, 2));
    }

    #[test]
    fn duplicates_are_absorbed_silently() {
        let mut index = TimeZoneIndex::single(5);
        assert!(index.add(5));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn adding_zero_is_a_no_op() {
        let mut index = TimeZoneIndex::EMPTY;
        assert!(index.add(0));
        assert!(index.is_empty());
    }

    #[test]
    fn normalized_orders_pairs_ascending() {
        assert_eq!(TimeZoneIndex::pair(9, 4).normalized(), TimeZoneIndex::pair(4, 9));
        assert_eq!(TimeZoneIndex::pair(4, 9).normalized(), TimeZoneIndex::pair(4, 9));
        assert_eq!(TimeZoneIndex::single(4).normalized(), TimeZoneIndex::single(4));
    }

    #[test]
    fn wide_sets_hold_their_capacity() {
        let mut set = TimeZoneIndex2::EMPTY;
        for i in 1..=4 {
            assert!(set.add(i));
        }
        assert!(!set.add(5));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);

        let mut set = TimeZoneIndex8::EMPTY;
        for i in 1..=8 {
            assert!(set.add(i * 100));
        }
        assert!(!set.add(1));
        assert_eq!(set.len(), 8);
        assert!(set.contains(800));
    }

    #[test]
    fn wide_set_seeds_from_a_leaf_payload() {
        let set = TimeZoneIndex8::from(TimeZoneIndex::pair(2, 11));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![2, 11]);
    }
}
