//! Attribute value dictionaries.
//!
//! A [`StringTable`] interns values into dense [`ValueId`]s. On top of it,
//! [`ValueDictionary`] keeps one [`HierarchicalBitset`] per value (the records
//! carrying that value) and [`ClaimTable`] enforces that a value belongs to at
//! most one record at a time.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::bitset::{check_uid, BitsetArena, GrowthPolicy, HierarchicalBitset, Uid};
use crate::config::IndexConfig;
use crate::error::{Error, Result};

/// Longest value accepted, in bytes.
pub const MAX_VALUE_LEN: usize = 255;

const DEFAULT_SLOTS: usize = 256;

/// Identifier of an interned value. Ids are assigned from 1 upward in
/// insertion order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(NonZeroU32);

impl ValueId {
    /// Builds an id from its numeric value. Returns `None` for 0.
    #[inline]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    /// Numeric value (at least 1).
    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    #[inline]
    fn index(self) -> usize {
        self.0.get() as usize - 1
    }

    #[inline]
    fn from_index(index: usize) -> Self {
        // index + 1 is never zero.
        Self(NonZeroU32::MIN.saturating_add(index as u32))
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueId({})", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hash_value(s: &str) -> u32 {
    let mut h: u32 = 0x0012_3456;
    for &b in s.as_bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(0x5123_5995);
    }
    h ^= h.rotate_left(8) ^ h.rotate_left(19);
    h = h.wrapping_mul(0x6243_5345);
    h ^ (h >> 16)
}

fn check_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::EmptyValue);
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(Error::ValueTooLong {
            len: value.len(),
            max: MAX_VALUE_LEN,
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct Entry {
    hash: u32,
    value: Box<str>,
}

/// Open-addressing intern table from string to [`ValueId`].
///
/// Slots hold `index + 1` of the entry (0 is empty). The slot array doubles
/// once 5/8 of it is in use; entries themselves never move, so ids are
/// stable.
#[derive(Debug, Clone)]
pub struct StringTable {
    slots: Vec<u32>,
    entries: Vec<Entry>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::with_slots(DEFAULT_SLOTS)
    }
}

impl StringTable {
    /// Creates an empty table with 256 slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty table with `slots` slots, rounded up to a power of
    /// two of at least 8.
    pub fn with_slots(slots: usize) -> Self {
        Self {
            slots: vec![0; slots.max(8).next_power_of_two()],
            entries: Vec::new(),
        }
    }

    /// Number of distinct values.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no value was inserted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current slot count.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the slot holding `value`, or the empty slot where it belongs.
    fn probe(&self, hash: u32, value: &str) -> usize {
        let mask = self.slots.len() - 1;
        let mut pos = hash as usize & mask;
        let mut stride = 1;
        while self.slots[pos] != 0 {
            let entry = &self.entries[self.slots[pos] as usize - 1];
            if entry.hash == hash && &*entry.value == value {
                break;
            }
            pos = (pos + stride) & mask;
            stride += 1;
        }
        pos
    }

    fn rebalance(&mut self) {
        let size = self.slots.len() * 2;
        let mask = size - 1;
        let mut slots = vec![0u32; size];
        for (i, entry) in self.entries.iter().enumerate() {
            let mut pos = entry.hash as usize & mask;
            let mut stride = 1;
            while slots[pos] != 0 {
                pos = (pos + stride) & mask;
                stride += 1;
            }
            slots[pos] = i as u32 + 1;
        }
        self.slots = slots;
        tracing::debug!(values = self.entries.len(), slots = size, "string table rebalanced");
    }

    /// Interns `value`. Returns its id and whether it was newly added.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyValue`] for `""`, [`Error::ValueTooLong`] past
    /// [`MAX_VALUE_LEN`] bytes.
    pub fn insert(&mut self, value: &str) -> Result<(ValueId, bool)> {
        check_value(value)?;
        let hash = hash_value(value);
        let mut pos = self.probe(hash, value);
        if self.slots[pos] != 0 {
            return Ok((ValueId::from_index(self.slots[pos] as usize - 1), false));
        }

        if (self.entries.len() + 1) * 8 > self.slots.len() * 5 {
            self.rebalance();
            pos = self.probe(hash, value);
        }
        self.entries.push(Entry {
            hash,
            value: value.into(),
        });
        self.slots[pos] = self.entries.len() as u32;
        Ok((ValueId::from_index(self.entries.len() - 1), true))
    }

    /// Looks up an interned value.
    pub fn find(&self, value: &str) -> Option<ValueId> {
        if value.is_empty() || value.len() > MAX_VALUE_LEN {
            return None;
        }
        let pos = self.probe(hash_value(value), value);
        match self.slots[pos] {
            0 => None,
            ix => Some(ValueId::from_index(ix as usize - 1)),
        }
    }

    /// Value behind `id`, if `id` came from this table.
    pub fn get(&self, id: ValueId) -> Option<&str> {
        self.entries.get(id.index()).map(|e| &*e.value)
    }

    /// Iterates over `(id, value)` in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ValueId, &str)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (ValueId::from_index(i), &*e.value))
    }
}

struct Values {
    table: StringTable,
    bitsets: Vec<Arc<HierarchicalBitset>>,
}

/// Value → record-set mapping for one attribute.
///
/// Records with an empty value go to the [`null`](Self::null) set; records
/// with any non-empty value are also tracked in [`not_null`](Self::not_null).
/// Membership changes ([`add`](Self::add) / [`remove`](Self::remove) of a
/// non-empty value) are serialized per dictionary so that a record is in
/// `not_null` exactly when it carries at least one value.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sievedb_core::{BitsetArena, IndexConfig, ValueDictionary};
///
/// let arena = Arc::new(BitsetArena::with_capacity(64));
/// let dict = ValueDictionary::new(arena, &IndexConfig::default());
///
/// let red = dict.add("red", 10).unwrap().unwrap();
/// dict.add("red", 11).unwrap();
/// assert_eq!(dict.add("", 12).unwrap(), None);
///
/// let reds = dict.get_bitset(red).unwrap();
/// assert!(reds.contains(10) && reds.contains(11));
/// assert!(dict.null().contains(12));
/// assert!(!dict.not_null().contains(12));
/// ```
pub struct ValueDictionary {
    arena: Arc<BitsetArena>,
    policy: GrowthPolicy,
    values: RwLock<Values>,
    // Number of values each record carries.
    carried: Mutex<HashMap<Uid, u32>>,
    null: HierarchicalBitset,
    not_null: HierarchicalBitset,
}

impl ValueDictionary {
    /// Creates an empty dictionary whose bitsets live in `arena`.
    pub fn new(arena: Arc<BitsetArena>, config: &IndexConfig) -> Self {
        let policy = GrowthPolicy::from(config);
        Self {
            null: HierarchicalBitset::with_policy(arena.clone(), policy),
            not_null: HierarchicalBitset::with_policy(arena.clone(), policy),
            values: RwLock::new(Values {
                table: StringTable::with_slots(config.dictionary_initial_slots),
                bitsets: Vec::new(),
            }),
            carried: Mutex::new(HashMap::new()),
            arena,
            policy,
        }
    }

    /// Number of distinct non-empty values.
    pub fn len(&self) -> usize {
        self.values.read().table.len()
    }

    /// Returns true if no value was inserted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interns `value`, creating its (empty) bitset on first sight.
    pub fn insert(&self, value: &str) -> Result<(ValueId, bool)> {
        Ok(self.entry(value)?.0)
    }

    fn entry(&self, value: &str) -> Result<((ValueId, bool), Arc<HierarchicalBitset>)> {
        if let Some(id) = self.find(value) {
            if let Some(bitset) = self.get_bitset(id) {
                return Ok(((id, false), bitset));
            }
        }

        let mut values = self.values.write();
        let (id, created) = values.table.insert(value)?;
        if created {
            values.bitsets.push(Arc::new(HierarchicalBitset::with_policy(
                self.arena.clone(),
                self.policy,
            )));
        }
        let bitset = values.bitsets[id.index()].clone();
        Ok(((id, created), bitset))
    }

    /// Looks up a value.
    pub fn find(&self, value: &str) -> Option<ValueId> {
        self.values.read().table.find(value)
    }

    /// Bitset of records carrying `id`.
    pub fn get_bitset(&self, id: ValueId) -> Option<Arc<HierarchicalBitset>> {
        self.values.read().bitsets.get(id.index()).cloned()
    }

    /// The string behind `id`.
    pub fn value(&self, id: ValueId) -> Option<String> {
        self.values.read().table.get(id).map(str::to_owned)
    }

    /// Records `uid` as carrying `value`. An empty value marks the record
    /// null and returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// [`Error::UidOutOfRange`] or [`Error::ValueTooLong`] before anything is
    /// changed; [`Error::ArenaExhausted`] if a bitset cannot grow, in which
    /// case neither the value set nor `not_null` gains the record.
    pub fn add(&self, value: &str, uid: Uid) -> Result<Option<ValueId>> {
        check_uid(uid)?;
        if value.is_empty() {
            self.null.set(uid)?;
            return Ok(None);
        }
        let ((id, _), bitset) = self.entry(value)?;

        let mut carried = self.carried.lock();
        if bitset.contains(uid) {
            return Ok(Some(id));
        }
        let first = !carried.contains_key(&uid);
        if first {
            self.not_null.set(uid)?;
        }
        if let Err(e) = bitset.set(uid) {
            if first {
                self.unset_not_null(uid);
            }
            return Err(e);
        }
        *carried.entry(uid).or_insert(0) += 1;
        Ok(Some(id))
    }

    fn unset_not_null(&self, uid: Uid) {
        if let Err(e) = self.not_null.unset(uid) {
            tracing::warn!(uid, error = %e, "failed to roll back not_null");
        }
    }

    /// Undoes [`add`](Self::add). `None` means the null set.
    ///
    /// The record leaves `not_null` once it carries no value at all.
    pub fn remove(&self, id: Option<ValueId>, uid: Uid) -> Result<()> {
        check_uid(uid)?;
        let Some(id) = id else {
            return self.null.unset(uid);
        };
        let Some(bitset) = self.get_bitset(id) else {
            return Ok(());
        };

        let mut carried = self.carried.lock();
        if !bitset.contains(uid) {
            return Ok(());
        }
        bitset.unset(uid)?;
        match carried.get_mut(&uid) {
            Some(n) if *n > 1 => *n -= 1,
            _ => {
                carried.remove(&uid);
                self.not_null.unset(uid)?;
            }
        }
        Ok(())
    }

    /// Records whose value is empty.
    #[inline]
    pub fn null(&self) -> &HierarchicalBitset {
        &self.null
    }

    /// Records with at least one non-empty value.
    #[inline]
    pub fn not_null(&self) -> &HierarchicalBitset {
        &self.not_null
    }

    /// Snapshot of all `(id, value)` pairs, in id order.
    pub fn values(&self) -> Vec<(ValueId, String)> {
        self.values
            .read()
            .table
            .iter()
            .map(|(id, v)| (id, v.to_owned()))
            .collect()
    }
}

impl fmt::Debug for ValueDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueDictionary")
            .field("values", &self.len())
            .field("null", &self.null.len())
            .field("not_null", &self.not_null.len())
            .finish()
    }
}

struct Claims {
    table: StringTable,
    owners: Vec<Option<Uid>>,
}

/// Values that belong to at most one record, such as e-mail addresses.
///
/// # Example
///
/// ```
/// use sievedb_core::{ClaimTable, Error};
///
/// let claims = ClaimTable::new();
/// let id = claims.claim("ann@example.com", 1).unwrap();
/// assert!(matches!(
///     claims.claim("ann@example.com", 2),
///     Err(Error::AlreadyClaimed { owner: 1, .. })
/// ));
///
/// claims.release(id, 1);
/// claims.claim("ann@example.com", 2).unwrap();
/// assert_eq!(claims.owner("ann@example.com"), Some(2));
/// ```
pub struct ClaimTable {
    inner: Mutex<Claims>,
}

impl Default for ClaimTable {
    fn default() -> Self {
        Self::with_slots(DEFAULT_SLOTS)
    }
}

impl ClaimTable {
    /// Creates an empty claim table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty claim table with `slots` initial slots.
    pub fn with_slots(slots: usize) -> Self {
        Self {
            inner: Mutex::new(Claims {
                table: StringTable::with_slots(slots),
                owners: Vec::new(),
            }),
        }
    }

    /// Assigns `value` to `uid`. Claiming a value already owned by `uid` is
    /// a no-op.
    ///
    /// A claim on a value owned by someone else is reported as an error, not
    /// treated as fatal: the caller decides whether the conflict is a bug or
    /// a rejected request. Only [`release`](Self::release) by a non-owner
    /// panics.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyClaimed`] when another record owns the value, plus
    /// the value validation errors of [`StringTable::insert`].
    pub fn claim(&self, value: &str, uid: Uid) -> Result<ValueId> {
        let mut claims = self.inner.lock();
        let (id, created) = claims.table.insert(value)?;
        if created {
            claims.owners.push(None);
        }
        let owner = &mut claims.owners[id.index()];
        match *owner {
            None => {
                *owner = Some(uid);
                Ok(id)
            }
            Some(current) if current == uid => Ok(id),
            Some(current) => {
                tracing::warn!(value, uid, owner = current, "claim rejected");
                Err(Error::AlreadyClaimed {
                    value: value.to_owned(),
                    owner: current,
                })
            }
        }
    }

    /// Frees `id` so another record can claim it.
    ///
    /// # Panics
    ///
    /// Panics if `uid` does not own `id`.
    pub fn release(&self, id: ValueId, uid: Uid) {
        let mut claims = self.inner.lock();
        let owner = claims.owners.get(id.index()).copied().flatten();
        if owner != Some(uid) {
            let value = claims.table.get(id).unwrap_or_default().to_owned();
            drop(claims);
            panic!("uid {} does not own value {:?} (owner: {:?})", uid, value, owner);
        }
        claims.owners[id.index()] = None;
    }

    /// Current owner of `value`.
    pub fn owner(&self, value: &str) -> Option<Uid> {
        let claims = self.inner.lock();
        let id = claims.table.find(value)?;
        claims.owners[id.index()]
    }

    /// Id of `value`, whether or not it is currently claimed.
    pub fn find(&self, value: &str) -> Option<ValueId> {
        self.inner.lock().table.find(value)
    }
}

impl fmt::Debug for ClaimTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let claims = self.inner.lock();
        f.debug_struct("ClaimTable")
            .field("values", &claims.table.len())
            .field("claimed", &claims.owners.iter().filter(|o| o.is_some()).count())
            .finish()
    }
}
