//! Open-addressing tables used while aggregating query results.
//!
//! Both tables key on non-zero `u32` identifiers and use slot value 0 as the
//! empty marker. Probing starts at `uid & mask` and advances by a stride that
//! grows by one after every collision (1, 2, 3, ...), which visits every slot
//! of a power-of-two table and spreads clustered identifiers better than a
//! fixed stride.

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::bitset::{BlockUids, IndexableSet, Uid};
use crate::compound::QuerySet;

const MIN_SLOTS: usize = 8;

/// Smallest power of two that is at least `2 * expected`, never below 8.
#[inline]
pub fn table_size(expected: usize) -> usize {
    expected
        .saturating_mul(2)
        .max(MIN_SLOTS)
        .checked_next_power_of_two()
        .unwrap_or(1 << (usize::BITS - 1))
}

#[inline]
fn assert_key(uid: Uid) {
    assert!(uid != 0, "uid 0 is reserved as the empty-slot marker");
}

/// A uid with its accumulated score.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoredUid {
    /// Identifier (group key).
    pub uid: Uid,
    /// Accumulated score. Zero or negative means "does not match".
    pub score: f64,
}

impl ScoredUid {
    /// Creates an entry.
    #[inline]
    pub fn new(uid: Uid, score: f64) -> Self {
        Self { uid, score }
    }
}

/// Hash table from uid to score.
///
/// # Example
///
/// ```
/// use sievedb_core::CounterTable;
///
/// let mut table = CounterTable::with_expected(4);
/// table.insert(7).score += 1.0;
/// table.insert(7).score += 2.5;
/// table.insert(9).score += 1.0;
///
/// assert_eq!(table.len(), 2);
/// assert_eq!(table.get(7).map(|c| c.score), Some(3.5));
/// ```
#[derive(Debug, Clone)]
pub struct CounterTable {
    slots: Vec<ScoredUid>,
    len: usize,
}

impl CounterTable {
    /// Creates a table sized for `expected` distinct keys at 50% load.
    pub fn with_expected(expected: usize) -> Self {
        Self {
            slots: vec![ScoredUid::default(); table_size(expected)],
            len: 0,
        }
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of distinct keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing was inserted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn probe(&self, uid: Uid) -> usize {
        let mask = self.slots.len() - 1;
        let mut pos = uid as usize & mask;
        let mut stride = 1;
        loop {
            let slot = self.slots[pos].uid;
            if slot == uid || slot == 0 {
                return pos;
            }
            pos = (pos + stride) & mask;
            stride += 1;
        }
    }

    /// Returns the entry for `uid`, creating it with score 0 if absent.
    ///
    /// # Panics
    ///
    /// Panics if `uid` is 0.
    pub fn insert(&mut self, uid: Uid) -> &mut ScoredUid {
        assert_key(uid);
        let mut pos = self.probe(uid);
        if self.slots[pos].uid == 0 {
            if (self.len + 1) * 2 > self.slots.len() {
                self.grow();
                pos = self.probe(uid);
            }
            self.slots[pos].uid = uid;
            self.len += 1;
        }
        &mut self.slots[pos]
    }

    /// Looks up `uid` without inserting.
    pub fn get(&self, uid: Uid) -> Option<&ScoredUid> {
        if uid == 0 {
            return None;
        }
        let slot = &self.slots[self.probe(uid)];
        (slot.uid == uid).then_some(slot)
    }

    fn grow(&mut self) {
        let size = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, vec![ScoredUid::default(); size]);
        tracing::debug!(
            len = self.len,
            slots = self.slots.len(),
            "counter table grown past its estimate"
        );
        for entry in old.into_iter().filter(|e| e.uid != 0) {
            let pos = self.probe(entry.uid);
            self.slots[pos] = entry;
        }
    }

    /// Iterates over occupied slots in table order.
    pub fn iter(&self) -> impl Iterator<Item = &ScoredUid> {
        self.slots.iter().filter(|e| e.uid != 0)
    }

    /// Consumes the table, returning the occupied slots.
    pub fn into_entries(self) -> Vec<ScoredUid> {
        let mut slots = self.slots;
        slots.retain(|e| e.uid != 0);
        slots
    }
}

/// Hash set of uids, used to count distinct values.
#[derive(Debug, Clone)]
pub struct DedupSet {
    slots: Vec<Uid>,
    len: usize,
}

impl DedupSet {
    /// Creates a set sized for `expected` distinct uids at 50% load.
    pub fn with_expected(expected: usize) -> Self {
        Self {
            slots: vec![0; table_size(expected)],
            len: 0,
        }
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of distinct uids.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing was inserted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn probe(&self, uid: Uid) -> usize {
        let mask = self.slots.len() - 1;
        let mut pos = uid as usize & mask;
        let mut stride = 1;
        while self.slots[pos] != uid && self.slots[pos] != 0 {
            pos = (pos + stride) & mask;
            stride += 1;
        }
        pos
    }

    /// Adds `uid`. Returns true if it was not present before.
    ///
    /// # Panics
    ///
    /// Panics if `uid` is 0.
    pub fn insert(&mut self, uid: Uid) -> bool {
        assert_key(uid);
        let mut pos = self.probe(uid);
        if self.slots[pos] == uid {
            return false;
        }
        if (self.len + 1) * 2 > self.slots.len() {
            let size = self.slots.len() * 2;
            let old = std::mem::replace(&mut self.slots, vec![0; size]);
            for u in old.into_iter().filter(|&u| u != 0) {
                let p = self.probe(u);
                self.slots[p] = u;
            }
            pos = self.probe(uid);
        }
        self.slots[pos] = uid;
        self.len += 1;
        true
    }

    /// Returns true if `uid` was inserted.
    pub fn contains(&self, uid: Uid) -> bool {
        uid != 0 && self.slots[self.probe(uid)] == uid
    }
}

/// Walks `set` (uids up to `max_uid`, highest first) and sums the metric per
/// group.
///
/// `metric` maps a member uid to `(group_key, weight)`; returning `None`
/// skips the uid. Group keys must be non-zero.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sievedb_core::{accumulate, BitsetArena, HierarchicalBitset, QuerySet};
///
/// let arena = Arc::new(BitsetArena::with_capacity(16));
/// let set = HierarchicalBitset::new(arena);
/// for uid in 1..=6 {
///     set.set(uid).unwrap();
/// }
///
/// // Group by parity, count members.
/// let mut query = QuerySet::leaf(set.snapshot());
/// let table = accumulate(&mut query, u32::MAX, 2, |uid| Some((uid % 2 + 1, 1.0)));
/// assert_eq!(table.get(1).map(|c| c.score), Some(3.0));
/// assert_eq!(table.get(2).map(|c| c.score), Some(3.0));
/// ```
pub fn accumulate<F>(
    set: &mut QuerySet,
    max_uid: Uid,
    expected_groups: usize,
    mut metric: F,
) -> CounterTable
where
    F: FnMut(Uid) -> Option<(Uid, f64)>,
{
    let mut table = CounterTable::with_expected(expected_groups);
    let _ = set.for_each_block(max_uid, &mut |span, mask| {
        for uid in BlockUids::new(span, mask) {
            if let Some((group, weight)) = metric(uid) {
                table.insert(group).score += weight;
            }
        }
        ControlFlow::Continue(())
    });
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_size() {
        assert_eq!(table_size(0), 8);
        assert_eq!(table_size(3), 8);
        assert_eq!(table_size(4), 8);
        assert_eq!(table_size(5), 16);
        assert_eq!(table_size(100), 256);
        assert_eq!(CounterTable::with_expected(64).capacity(), 128);
        assert_eq!(DedupSet::with_expected(9).capacity(), 32);
    }

    #[test]
    fn test_counter_insert_returns_same_slot() {
        let mut table = CounterTable::with_expected(10);
        table.insert(42).score += 1.0;
        table.insert(42).score += 1.0;
        table.insert(43).score += 5.0;

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(42), Some(&ScoredUid::new(42, 2.0)));
        assert_eq!(table.get(43).map(|c| c.score), Some(5.0));
        assert!(table.get(44).is_none());
        assert!(table.get(0).is_none());
    }

    #[test]
    fn test_counter_collisions() {
        let n = 16;
        let mut table = CounterTable::with_expected(n);
        let cap = table.capacity() as Uid;
        assert!(cap as usize >= 2 * n);

        // All hash to slot 0.
        let uids: Vec<Uid> = (1..=n as Uid).map(|i| i * cap).collect();
        let mut slots = HashSet::new();
        for &uid in &uids {
            let slot: *const ScoredUid = table.insert(uid);
            assert!(slots.insert(slot as usize), "uid {} shares a slot", uid);
        }
        for (i, &uid) in uids.iter().enumerate() {
            let entry = table.insert(uid);
            entry.score += i as f64 + 1.0;
            let again: *const ScoredUid = table.insert(uid);
            assert!(slots.contains(&(again as usize)));
        }
        assert_eq!(table.len(), n);
        assert_eq!(table.capacity(), cap as usize);
        for (i, &uid) in uids.iter().enumerate() {
            assert_eq!(table.get(uid).map(|c| c.score), Some(i as f64 + 1.0));
        }
    }

    #[test]
    fn test_counter_grows_past_estimate() {
        let mut table = CounterTable::with_expected(2);
        for uid in 1..=100 {
            table.insert(uid).score += uid as f64;
        }
        assert_eq!(table.len(), 100);
        assert!(table.capacity() >= 200);
        assert!(table.capacity().is_power_of_two());
        for uid in 1..=100 {
            assert_eq!(table.get(uid).map(|c| c.score), Some(uid as f64));
        }
    }

    #[test]
    fn test_into_entries() {
        let mut table = CounterTable::with_expected(4);
        for uid in [3, 1, 2] {
            table.insert(uid).score = 1.0;
        }
        let mut uids: Vec<Uid> = table.into_entries().into_iter().map(|e| e.uid).collect();
        uids.sort_unstable();
        assert_eq!(uids, vec![1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "uid 0 is reserved")]
    fn test_counter_rejects_zero() {
        let mut table = CounterTable::with_expected(4);
        table.insert(0);
    }

    #[test]
    fn test_dedup_set() {
        let mut set = DedupSet::with_expected(4);
        assert!(set.insert(5));
        assert!(!set.insert(5));
        assert!(set.insert(13));
        assert!(set.contains(13));
        assert!(!set.contains(0));
        assert!(!set.contains(6));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_dedup_collisions_and_growth() {
        let mut set = DedupSet::with_expected(8);
        let cap = set.capacity() as Uid;
        for i in 1..=8 {
            assert!(set.insert(i * cap));
        }
        for i in 1..=8 {
            assert!(!set.insert(i * cap));
        }
        for uid in 1..=1000 {
            set.insert(uid);
        }
        assert!((1..=1000).all(|uid| set.contains(uid)));
    }

    #[test]
    #[should_panic(expected = "uid 0 is reserved")]
    fn test_dedup_rejects_zero() {
        DedupSet::with_expected(1).insert(0);
    }
}
