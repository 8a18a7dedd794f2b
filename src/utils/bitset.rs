//! Fixed-capacity bit vector used for dataflow sets.
//!
//! Blocks, virtual registers and SSA names are all small dense integers, so
//! every per-block set in the compiler (use/def/live-in, dominators,
//! frontiers, null-check state) is one of these.

use serde::{Deserialize, Serialize};

const WORD_BITS: usize = 64;

/// A bit vector over the indices `0..capacity`.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Creates an empty set able to hold indices below `capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            len: capacity,
        }
    }

    /// Creates a set containing every index below `capacity`.
    #[must_use]
    pub fn full(capacity: usize) -> Self {
        let mut set = Self::new(capacity);
        set.fill();
        set
    }

    /// Number of indices this set can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.len
    }

    /// Returns `true` if no index is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Grows the set so that `index` fits. Existing bits are kept.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.len {
            self.words.resize(capacity.div_ceil(WORD_BITS), 0);
            self.len = capacity;
        }
    }

    /// Sets `index`. Returns `true` if it was not already set.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.capacity()`.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(index < self.len, "bit {index} out of range {}", self.len);
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1u64 << (index % WORD_BITS);
        let was_clear = *word & mask == 0;
        *word |= mask;
        was_clear
    }

    /// Clears `index`. Returns `true` if it was set.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.capacity()`.
    pub fn remove(&mut self, index: usize) -> bool {
        assert!(index < self.len, "bit {index} out of range {}", self.len);
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1u64 << (index % WORD_BITS);
        let was_set = *word & mask != 0;
        *word &= !mask;
        was_set
    }

    /// Returns `true` if `index` is set. Out-of-range indices are never set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
    }

    /// Number of set indices.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Clears every index.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Sets every index below the capacity.
    pub fn fill(&mut self) {
        self.words.iter_mut().for_each(|w| *w = u64::MAX);
        self.trim_tail();
    }

    /// Replaces the contents with those of `other`, adopting its capacity.
    pub fn copy_from(&mut self, other: &Self) {
        self.words.clone_from(&other.words);
        self.len = other.len;
    }

    /// In-place union. Returns `true` if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        self.zip_update(other, |a, b| a | b)
    }

    /// In-place intersection. Returns `true` if `self` changed.
    pub fn intersect_with(&mut self, other: &Self) -> bool {
        let mut changed = self.zip_update(other, |a, b| a & b);
        // Words missing from `other` are all zero.
        for word in self.words.iter_mut().skip(other.words.len()) {
            changed |= *word != 0;
            *word = 0;
        }
        changed
    }

    /// In-place difference (`self - other`). Returns `true` if `self` changed.
    pub fn difference_with(&mut self, other: &Self) -> bool {
        self.zip_update(other, |a, b| a & !b)
    }

    /// `self |= src & !mask`, the live-in transfer over one successor.
    pub fn union_with_difference(&mut self, src: &Self, mask: &Self) -> bool {
        let mut changed = false;
        for (i, word) in self.words.iter_mut().enumerate() {
            let s = src.words.get(i).copied().unwrap_or(0);
            let m = mask.words.get(i).copied().unwrap_or(0);
            let next = *word | (s & !m);
            changed |= next != *word;
            *word = next;
        }
        self.trim_tail();
        changed
    }

    /// Iterates over the set indices in increasing order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            words: &self.words,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }

    fn zip_update(&mut self, other: &Self, op: impl Fn(u64, u64) -> u64) -> bool {
        let mut changed = false;
        for (word, theirs) in self.words.iter_mut().zip(other.words.iter()) {
            let next = op(*word, *theirs);
            changed |= next != *word;
            *word = next;
        }
        self.trim_tail();
        changed
    }

    fn trim_tail(&mut self) {
        let tail = self.len % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for BitSet {
    /// Collects indices into a set just large enough to hold the largest.
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let indices: Vec<usize> = iter.into_iter().collect();
        let capacity = indices.iter().max().map_or(0, |m| m + 1);
        let mut set = BitSet::new(capacity);
        for idx in indices {
            set.insert(idx);
        }
        set
    }
}

/// Iterator over the set indices of a [`BitSet`].
pub struct BitSetIter<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * WORD_BITS + bit);
            }
            self.word_idx += 1;
            self.current = *self.words.get(self.word_idx)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove_contains() {
        let mut bs = BitSet::new(130);
        assert!(bs.is_empty());
        assert!(bs.insert(0));
        assert!(bs.insert(64));
        assert!(bs.insert(129));
        assert!(!bs.insert(64));
        assert_eq!(bs.count(), 3);
        assert!(bs.contains(129));
        assert!(!bs.contains(200));
        assert!(bs.remove(64));
        assert!(!bs.remove(64));
        assert_eq!(bs.iter().collect::<Vec<_>>(), vec![0, 129]);
    }

    #[test]
    fn test_full_respects_capacity() {
        let bs = BitSet::full(70);
        assert_eq!(bs.count(), 70);
        assert_eq!(bs.iter().last(), Some(69));
    }

    #[test]
    fn test_set_operations_report_change() {
        let mut a: BitSet = [1, 2, 3].into_iter().collect();
        let b: BitSet = [2, 3].into_iter().collect();
        assert!(a.intersect_with(&b));
        assert!(!a.intersect_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![2, 3]);

        let mut c = BitSet::new(4);
        c.insert(0);
        assert!(c.union_with(&a));
        assert!(!c.union_with(&a));
        assert!(c.difference_with(&b));
        assert_eq!(c.iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_union_with_difference() {
        let mut live = BitSet::new(8);
        let succ_live: BitSet = [1, 4, 6].into_iter().collect();
        let defs: BitSet = [4].into_iter().collect();
        assert!(live.union_with_difference(&succ_live, &defs));
        assert_eq!(live.iter().collect::<Vec<_>>(), vec![1, 6]);
        assert!(!live.union_with_difference(&succ_live, &defs));
    }

    #[test]
    fn test_ensure_capacity_keeps_bits() {
        let mut bs = BitSet::new(3);
        bs.insert(2);
        bs.ensure_capacity(100);
        bs.insert(99);
        assert_eq!(bs.iter().collect::<Vec<_>>(), vec![2, 99]);
    }
}
