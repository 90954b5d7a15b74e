//! Fixed-width component-set bitmask.
//!
//! A [`Signature`] identifies an archetype: two archetypes are the same
//! partition iff their signatures are equal. Bit `i` is set when the
//! component with [`ComponentId`] index `i` is part of the set.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::component::{ComponentId, MAX_COMPONENTS};

const WORDS: usize = MAX_COMPONENTS / 64;

/// A 256-bit set of component ids, stored as four 64-bit words.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    words: [u64; WORDS],
}

impl Signature {
    /// The empty set.
    pub const EMPTY: Signature = Signature { words: [0; WORDS] };

    /// Build a signature from a list of ids. Duplicates collapse.
    pub fn from_ids(ids: &[ComponentId]) -> Self {
        let mut signature = Self::EMPTY;
        for &id in ids {
            signature.set(id);
        }
        signature
    }

    #[inline]
    fn split(id: ComponentId) -> (usize, u64) {
        let index = id.index();
        (index / 64, 1u64 << (index % 64))
    }

    /// Add `id` to the set.
    #[inline]
    pub fn set(&mut self, id: ComponentId) {
        let (word, bit) = Self::split(id);
        self.words[word] |= bit;
    }

    /// Remove `id` from the set.
    #[inline]
    pub fn clear(&mut self, id: ComponentId) {
        let (word, bit) = Self::split(id);
        self.words[word] &= !bit;
    }

    /// Copy of `self` with `id` added.
    #[inline]
    pub fn with(mut self, id: ComponentId) -> Self {
        self.set(id);
        self
    }

    /// Copy of `self` with `id` removed.
    #[inline]
    pub fn without(mut self, id: ComponentId) -> Self {
        self.clear(id);
        self
    }

    /// Whether `id` is in the set.
    #[inline]
    pub fn contains(&self, id: ComponentId) -> bool {
        let (word, bit) = Self::split(id);
        self.words[word] & bit != 0
    }

    /// Whether every id in `other` is also in `self`.
    #[inline]
    pub fn is_superset(&self, other: &Signature) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(mine, theirs)| mine & theirs == *theirs)
    }

    /// Whether `self` and `other` share no ids.
    #[inline]
    pub fn is_disjoint(&self, other: &Signature) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(mine, theirs)| mine & theirs == 0)
    }

    /// Whether no ids are set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Number of ids in the set.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// All ids in the set, in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index * 64;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some(ComponentId((base + tz) as u8))
                })
            })
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|id| id.0)).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn id(i: u8) -> ComponentId {
        ComponentId(i)
    }

    #[test]
    fn set_clear_contains_across_words() {
        let mut s = Signature::EMPTY;
        for i in [0u8, 63, 64, 127, 128, 255] {
            s.set(id(i));
            assert!(s.contains(id(i)));
        }
        assert_eq!(s.len(), 6);
        s.clear(id(64));
        assert!(!s.contains(id(64)));
        assert!(s.contains(id(63)));
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn iter_is_ascending() {
        let s = Signature::from_ids(&[id(200), id(3), id(64), id(3), id(0)]);
        let ids: Vec<u8> = s.iter().map(|c| c.0).collect();
        assert_eq!(ids, vec![0, 3, 64, 200]);
    }

    #[test]
    fn superset_and_disjoint() {
        let ab = Signature::from_ids(&[id(1), id(130)]);
        let a = Signature::from_ids(&[id(1)]);
        let c = Signature::from_ids(&[id(2)]);
        assert!(ab.is_superset(&a));
        assert!(!a.is_superset(&ab));
        assert!(ab.is_superset(&Signature::EMPTY));
        assert!(ab.is_disjoint(&c));
        assert!(!ab.is_disjoint(&a));
        assert!(Signature::EMPTY.is_disjoint(&Signature::EMPTY));
    }

    #[test]
    fn with_and_without_do_not_mutate_original() {
        let base = Signature::from_ids(&[id(5)]);
        let grown = base.with(id(9));
        assert!(!base.contains(id(9)));
        assert!(grown.contains(id(9)));
        assert_eq!(grown.without(id(9)), base);
    }
}
