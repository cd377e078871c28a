//! Hierarchical bitset: the per-value identifier set.
//!
//! A bitset starts out empty (null handle), becomes a short unsorted
//! [`RawList`] on the first insert, and switches to a three-level
//! [`DenseBitmap`] once the list fills up. It never goes back.
//!
//! # Geometry
//!
//! | Level | Words | One bit covers |
//! |-------|-------|----------------|
//! | L1 | 64 | one L2 word (1024 uids) |
//! | L2 | 2048 | one L3 block (32 uids) |
//! | L3 | 65536 | one uid |
//!
//! A set bit in L1/L2 only promises that something below *may* be set.
//! Iteration always walks from the highest uid down, which yields
//! "most recent first" for identifiers allocated in insertion order.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use roaring::RoaringBitmap;

use crate::arena::{Arena, Handle};
use crate::config::IndexConfig;
use crate::error::{Error, Result};

/// Record identifier.
pub type Uid = u32;

/// Bits per L3 block.
pub const BLOCK_BITS: u32 = 32;
/// Words in the L1 summary.
pub const L1_WORDS: usize = 64;
/// Words in the L2 summary.
pub const L2_WORDS: usize = L1_WORDS * 32;
/// Number of L3 blocks.
pub const BLOCKS: usize = L2_WORDS * 32;
/// Exclusive upper bound of storable identifiers.
pub const UID_LIMIT: Uid = (BLOCKS as u32) * BLOCK_BITS;

/// Arena holding bitset representations.
pub type BitsetArena = Arena<Repr>;

/// Visitor passed to block iteration: `(span, mask)` where `span` is the
/// first uid of the block.
pub type BlockVisitor<'a> = dyn FnMut(Uid, u32) -> ControlFlow<()> + 'a;

/// First uid of the block containing `uid`.
#[inline]
pub fn span_of(uid: Uid) -> Uid {
    uid & !(BLOCK_BITS - 1)
}

#[inline]
pub(crate) fn bit_of(uid: Uid) -> u32 {
    1 << (uid & (BLOCK_BITS - 1))
}

#[inline]
pub(crate) fn has_bit(words: &[u32], ix: usize) -> bool {
    words[ix >> 5] & (1 << (ix & 31)) != 0
}

#[inline]
pub(crate) fn set_bit(words: &mut [u32], ix: usize) {
    words[ix >> 5] |= 1 << (ix & 31);
}

#[inline]
pub(crate) fn clear_bit(words: &mut [u32], ix: usize) {
    words[ix >> 5] &= !(1 << (ix & 31));
}

/// Mask with bits `0..=n` set.
#[inline]
fn mask_through(n: u32) -> u32 {
    if n >= 31 {
        u32::MAX
    } else {
        (1 << (n + 1)) - 1
    }
}

#[inline]
pub(crate) fn check_uid(uid: Uid) -> Result<()> {
    if uid >= UID_LIMIT {
        return Err(Error::UidOutOfRange {
            uid,
            limit: UID_LIMIT,
        });
    }
    Ok(())
}

/// Iterator over the uids of one block, highest first.
#[derive(Debug, Clone, Copy)]
pub struct BlockUids {
    span: Uid,
    mask: u32,
}

impl BlockUids {
    /// Creates an iterator over the bits of `mask` offset by `span`.
    #[inline]
    pub fn new(span: Uid, mask: u32) -> Self {
        Self { span, mask }
    }
}

impl Iterator for BlockUids {
    type Item = Uid;

    #[inline]
    fn next(&mut self) -> Option<Uid> {
        if self.mask == 0 {
            return None;
        }
        let bit = 31 - self.mask.leading_zeros();
        self.mask &= !(1 << bit);
        Some(self.span + bit)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.mask.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for BlockUids {}

/// The capability shared by single bitsets and compound sets.
///
/// Everything is expressed through three levels of words so that compound
/// sets can skip whole regions without looking at members' blocks. Methods
/// take `&mut self` because compound sets fill their caches lazily.
pub trait IndexableSet {
    /// Coarse summary: bit `i` set if L2 word `i` may be non-zero.
    fn l1_summary(&mut self) -> [u32; L1_WORDS];

    /// L2 word `l2ix`: bit `j` set if block `l2ix * 32 + j` may be non-zero.
    fn l2_word(&mut self, l2ix: usize) -> u32;

    /// Membership word of the block starting at `span`.
    fn block(&mut self, span: Uid) -> u32;

    /// Upper-bound cardinality estimate used for cost ordering.
    fn approx_len(&self) -> u32;

    /// Returns true if `uid` is a member.
    fn contains(&mut self, uid: Uid) -> bool {
        uid < UID_LIMIT && self.block(span_of(uid)) & bit_of(uid) != 0
    }

    /// Visits non-empty blocks from the highest uid down, skipping uids
    /// above `max_uid`.
    fn for_each_block(&mut self, max_uid: Uid, f: &mut BlockVisitor<'_>) -> ControlFlow<()>
    where
        Self: Sized,
    {
        walk_blocks(self, max_uid, f)
    }
}

/// Descending walk over the summary levels of `set`.
pub(crate) fn walk_blocks<S: IndexableSet>(
    set: &mut S,
    max_uid: Uid,
    f: &mut BlockVisitor<'_>,
) -> ControlFlow<()> {
    let max = max_uid.min(UID_LIMIT - 1);
    let top_l2 = (max >> 10) as usize;
    let top_block = max >> 5;
    let l1 = set.l1_summary();

    for l1ix in (0..=top_l2 >> 5).rev() {
        let mut l1v = l1[l1ix];
        if l1ix == top_l2 >> 5 {
            l1v &= mask_through(top_l2 as u32 & 31);
        }
        while l1v != 0 {
            let b1 = 31 - l1v.leading_zeros();
            l1v &= !(1 << b1);
            let l2ix = l1ix * 32 + b1 as usize;

            let mut l2v = set.l2_word(l2ix);
            if l2ix == top_l2 {
                l2v &= mask_through(top_block & 31);
            }
            while l2v != 0 {
                let b2 = 31 - l2v.leading_zeros();
                l2v &= !(1 << b2);
                let span = ((l2ix as u32) * 32 + b2) * BLOCK_BITS;

                let mut block = set.block(span);
                if span == span_of(max) {
                    block &= mask_through(max & 31);
                }
                if block != 0 {
                    f(span, block)?;
                }
            }
        }
    }
    ControlFlow::Continue(())
}

/// Visits a descending-sorted uid slice as `(span, mask)` blocks.
pub(crate) fn walk_sorted_uids(
    uids: &[Uid],
    max_uid: Uid,
    f: &mut BlockVisitor<'_>,
) -> ControlFlow<()> {
    let mut current: Option<(Uid, u32)> = None;
    for &uid in uids.iter().filter(|&&u| u <= max_uid) {
        let span = span_of(uid);
        if let Some((s, mask)) = current.as_mut() {
            if *s == span {
                *mask |= bit_of(uid);
                continue;
            }
        }
        if let Some((s, mask)) = current {
            f(s, mask)?;
        }
        current = Some((span, bit_of(uid)));
    }
    if let Some((s, mask)) = current {
        f(s, mask)?;
    }
    ControlFlow::Continue(())
}

/// Summaries of a small uid list, computed by scanning.
pub(crate) fn scan_l1(uids: &[Uid]) -> [u32; L1_WORDS] {
    let mut l1 = [0u32; L1_WORDS];
    for &uid in uids {
        set_bit(&mut l1, (uid >> 10) as usize);
    }
    l1
}

pub(crate) fn scan_l2(uids: &[Uid], l2ix: usize) -> u32 {
    uids.iter()
        .filter(|&&uid| (uid >> 10) as usize == l2ix)
        .fold(0, |acc, &uid| acc | 1 << ((uid >> 5) & 31))
}

pub(crate) fn scan_block(uids: &[Uid], span: Uid) -> u32 {
    uids.iter()
        .filter(|&&uid| span_of(uid) == span)
        .fold(0, |acc, &uid| acc | bit_of(uid))
}

/// Raw-list growth policy derived from [`IndexConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    /// Capacity of a new list.
    pub initial_capacity: u32,
    /// Capacity ceiling.
    pub max_capacity: u32,
    /// Member count above which the list becomes dense.
    pub upgrade_threshold: u32,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for GrowthPolicy {
    fn from(config: &IndexConfig) -> Self {
        Self {
            initial_capacity: config.raw_list_initial_capacity,
            max_capacity: config.raw_list_max_capacity,
            upgrade_threshold: config.upgrade_threshold(),
        }
    }
}

/// Short unsorted list of members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawList {
    uids: Vec<Uid>,
    capacity: u32,
}

impl RawList {
    fn with_capacity(capacity: u32) -> Self {
        Self {
            uids: Vec::with_capacity(capacity as usize),
            capacity,
        }
    }

    /// Members in insertion order (modulo removals).
    #[inline]
    pub fn as_slice(&self) -> &[Uid] {
        &self.uids
    }

    /// Number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.uids.len()
    }

    /// Returns true if the list has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    /// Allocated capacity.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Linear membership scan.
    #[inline]
    pub fn contains(&self, uid: Uid) -> bool {
        self.uids.contains(&uid)
    }

    fn pushed(&self, uid: Uid, capacity: u32) -> Self {
        let mut uids = Vec::with_capacity(capacity as usize);
        uids.extend_from_slice(&self.uids);
        uids.push(uid);
        Self { uids, capacity }
    }

    fn removed(&self, pos: usize) -> Self {
        let mut uids = self.uids.clone();
        uids.swap_remove(pos);
        Self {
            uids,
            capacity: self.capacity,
        }
    }
}

/// Three-level bitmap over the whole uid space.
///
/// Words are atomics: a single writer (holding the owning bitset's lock)
/// mutates them while any number of readers load them. L3 blocks are
/// allocated lazily, 32 words per L2 word.
pub struct DenseBitmap {
    l1: [AtomicU32; L1_WORDS],
    l2: Box<[AtomicU32]>,
    l3: Box<[OnceLock<Box<[AtomicU32; 32]>>]>,
    len: AtomicU32,
}

impl DenseBitmap {
    fn new() -> Self {
        Self {
            l1: std::array::from_fn(|_| AtomicU32::new(0)),
            l2: (0..L2_WORDS).map(|_| AtomicU32::new(0)).collect(),
            l3: (0..L2_WORDS).map(|_| OnceLock::new()).collect(),
            len: AtomicU32::new(0),
        }
    }

    fn from_uids<I: IntoIterator<Item = Uid>>(uids: I) -> Self {
        let dense = Self::new();
        for uid in uids {
            dense.insert(uid);
        }
        dense
    }

    /// Number of members.
    #[inline]
    pub fn len(&self) -> u32 {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns true if no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Block first, then L2, then L1: a reader that sees a summary bit also
    // sees the block it points at.
    fn insert(&self, uid: Uid) -> bool {
        let l2ix = (uid >> 10) as usize;
        let chunk = self.l3[l2ix]
            .get_or_init(|| Box::new(std::array::from_fn(|_| AtomicU32::new(0))));
        let bit = bit_of(uid);
        let prev = chunk[((uid >> 5) & 31) as usize].fetch_or(bit, Ordering::Release);
        if prev & bit != 0 {
            return false;
        }
        self.len.fetch_add(1, Ordering::Relaxed);
        self.l2[l2ix].fetch_or(1 << ((uid >> 5) & 31), Ordering::Release);
        self.l1[l2ix >> 5].fetch_or(1 << (l2ix & 31), Ordering::Release);
        true
    }

    fn remove(&self, uid: Uid) -> bool {
        let l2ix = (uid >> 10) as usize;
        let Some(chunk) = self.l3[l2ix].get() else {
            return false;
        };
        let bit = bit_of(uid);
        let prev = chunk[((uid >> 5) & 31) as usize].fetch_and(!bit, Ordering::Release);
        if prev & bit == 0 {
            return false;
        }
        self.len.fetch_sub(1, Ordering::Relaxed);
        if prev & !bit == 0 {
            self.l2[l2ix].fetch_and(!(1 << ((uid >> 5) & 31)), Ordering::Release);
        }
        true
    }

    /// Copy of the L1 summary.
    pub fn l1_summary(&self) -> [u32; L1_WORDS] {
        std::array::from_fn(|i| self.l1[i].load(Ordering::Acquire))
    }

    /// L2 summary word.
    #[inline]
    pub fn l2_word(&self, l2ix: usize) -> u32 {
        self.l2[l2ix].load(Ordering::Acquire)
    }

    /// Membership word of the block starting at `span`.
    #[inline]
    pub fn block(&self, span: Uid) -> u32 {
        self.l3[(span >> 10) as usize]
            .get()
            .map(|chunk| chunk[((span >> 5) & 31) as usize].load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Returns true if `uid` is a member.
    #[inline]
    pub fn contains(&self, uid: Uid) -> bool {
        uid < UID_LIMIT && self.block(span_of(uid)) & bit_of(uid) != 0
    }
}

impl fmt::Debug for DenseBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: u32 = self.l1_summary().iter().map(|w| w.count_ones()).sum();
        f.debug_struct("DenseBitmap")
            .field("len", &self.len())
            .field("l2_groups", &groups)
            .finish()
    }
}

/// A non-empty representation stored in the arena.
#[derive(Debug)]
pub enum Repr {
    /// Short unsorted list.
    Raw(RawList),
    /// Three-level bitmap.
    Dense(DenseBitmap),
}

/// Which representation a bitset currently uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReprKind {
    /// Null handle, no members ever stored.
    Empty,
    /// Raw list.
    Raw,
    /// Dense bitmap.
    Dense,
}

/// Point-in-time reader view of a bitset.
///
/// Holds the representation the handle pointed at when the view was taken.
/// Raw lists are copy-on-write, so a raw view never changes; a dense view
/// reads live words and may observe later writes.
#[derive(Debug, Clone, Default)]
pub struct BitsetView {
    repr: Option<Arc<Repr>>,
}

impl BitsetView {
    /// View of the empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    fn new(repr: Arc<Repr>) -> Self {
        Self { repr: Some(repr) }
    }

    /// Representation kind.
    pub fn kind(&self) -> ReprKind {
        match self.repr.as_deref() {
            None => ReprKind::Empty,
            Some(Repr::Raw(_)) => ReprKind::Raw,
            Some(Repr::Dense(_)) => ReprKind::Dense,
        }
    }

    /// Members of a raw list, if this view is one.
    pub fn raw_uids(&self) -> Option<&[Uid]> {
        match self.repr.as_deref() {
            Some(Repr::Raw(list)) => Some(list.as_slice()),
            _ => None,
        }
    }

    /// The dense bitmap, if this view is one.
    pub fn dense(&self) -> Option<&DenseBitmap> {
        match self.repr.as_deref() {
            Some(Repr::Dense(dense)) => Some(dense),
            _ => None,
        }
    }

    /// Exact member count.
    pub fn len(&self) -> u32 {
        match self.repr.as_deref() {
            None => 0,
            Some(Repr::Raw(list)) => list.len() as u32,
            Some(Repr::Dense(dense)) => dense.len(),
        }
    }

    /// Returns true if the view has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upper-bound cardinality estimate.
    pub fn approx_capacity(&self) -> u32 {
        match self.repr.as_deref() {
            None => 0,
            Some(Repr::Raw(list)) => list.capacity(),
            Some(Repr::Dense(dense)) => dense.len(),
        }
    }

    /// Returns true if `uid` is a member.
    pub fn has(&self, uid: Uid) -> bool {
        match self.repr.as_deref() {
            None => false,
            Some(Repr::Raw(list)) => list.contains(uid),
            Some(Repr::Dense(dense)) => dense.contains(uid),
        }
    }

    /// Visits `(span, mask)` blocks from the highest uid down.
    pub fn visit_blocks(&self, max_uid: Uid, f: &mut BlockVisitor<'_>) -> ControlFlow<()> {
        match self.repr.as_deref() {
            None => ControlFlow::Continue(()),
            Some(Repr::Raw(list)) => {
                let mut sorted = list.as_slice().to_vec();
                sorted.sort_unstable_by(|a, b| b.cmp(a));
                walk_sorted_uids(&sorted, max_uid, f)
            }
            Some(Repr::Dense(dense)) => walk_blocks(&mut DenseCursor(dense), max_uid, f),
        }
    }

    /// Copies the members into a roaring bitmap.
    pub fn to_roaring(&self) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        let _ = self.visit_blocks(Uid::MAX, &mut |span, mask| {
            out.extend(BlockUids::new(span, mask));
            ControlFlow::Continue(())
        });
        out
    }
}

impl IndexableSet for BitsetView {
    fn l1_summary(&mut self) -> [u32; L1_WORDS] {
        match self.repr.as_deref() {
            None => [0; L1_WORDS],
            Some(Repr::Raw(list)) => scan_l1(list.as_slice()),
            Some(Repr::Dense(dense)) => dense.l1_summary(),
        }
    }

    fn l2_word(&mut self, l2ix: usize) -> u32 {
        match self.repr.as_deref() {
            None => 0,
            Some(Repr::Raw(list)) => scan_l2(list.as_slice(), l2ix),
            Some(Repr::Dense(dense)) => dense.l2_word(l2ix),
        }
    }

    fn block(&mut self, span: Uid) -> u32 {
        match self.repr.as_deref() {
            None => 0,
            Some(Repr::Raw(list)) => scan_block(list.as_slice(), span),
            Some(Repr::Dense(dense)) => dense.block(span),
        }
    }

    fn approx_len(&self) -> u32 {
        self.approx_capacity()
    }

    fn contains(&mut self, uid: Uid) -> bool {
        self.has(uid)
    }

    fn for_each_block(&mut self, max_uid: Uid, f: &mut BlockVisitor<'_>) -> ControlFlow<()> {
        self.visit_blocks(max_uid, f)
    }
}

struct DenseCursor<'a>(&'a DenseBitmap);

impl IndexableSet for DenseCursor<'_> {
    fn l1_summary(&mut self) -> [u32; L1_WORDS] {
        self.0.l1_summary()
    }

    fn l2_word(&mut self, l2ix: usize) -> u32 {
        self.0.l2_word(l2ix)
    }

    fn block(&mut self, span: Uid) -> u32 {
        self.0.block(span)
    }

    fn approx_len(&self) -> u32 {
        self.0.len()
    }
}

/// Growable set of uids for one indexed value.
///
/// Writers are serialized by an internal lock; readers never take it. The
/// current representation is reached through a handle that is re-read on
/// every call, because list growth and the dense upgrade publish a new one.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sievedb_core::{BitsetArena, HierarchicalBitset, ReprKind};
///
/// let arena = Arc::new(BitsetArena::with_capacity(1024));
/// let set = HierarchicalBitset::new(arena);
///
/// set.set(10).unwrap();
/// set.set(42).unwrap();
/// assert!(set.contains(42));
/// assert!(!set.contains(11));
/// assert_eq!(set.kind(), ReprKind::Raw);
///
/// for uid in 100..200 {
///     set.set(uid).unwrap();
/// }
/// assert_eq!(set.kind(), ReprKind::Dense);
/// assert_eq!(set.len(), 102);
/// ```
pub struct HierarchicalBitset {
    arena: Arc<BitsetArena>,
    handle: AtomicU64,
    lock: Mutex<()>,
    policy: GrowthPolicy,
}

impl HierarchicalBitset {
    /// Creates an empty bitset with the default growth policy.
    pub fn new(arena: Arc<BitsetArena>) -> Self {
        Self::with_policy(arena, GrowthPolicy::default())
    }

    /// Creates an empty bitset with an explicit growth policy.
    pub fn with_policy(arena: Arc<BitsetArena>, policy: GrowthPolicy) -> Self {
        Self {
            arena,
            handle: AtomicU64::new(Handle::NULL.to_raw()),
            lock: Mutex::new(()),
            policy,
        }
    }

    /// Current handle. Null while the set is empty.
    #[inline]
    pub fn handle(&self) -> Handle {
        Handle::from_raw(self.handle.load(Ordering::Acquire))
    }

    #[inline]
    fn publish(&self, handle: Handle) {
        self.handle.store(handle.to_raw(), Ordering::Release);
    }

    fn retire(&self, handle: Handle) {
        if let Err(e) = self.arena.retire(handle) {
            tracing::warn!(?handle, error = %e, "failed to retire superseded bitset slot");
        }
    }

    /// Adds `uid`, upgrading the representation when needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UidOutOfRange`] for uids at or above [`UID_LIMIT`], and
    /// [`Error::ArenaExhausted`] if a new representation cannot be allocated
    /// (the old one stays in place).
    pub fn set(&self, uid: Uid) -> Result<()> {
        check_uid(uid)?;
        let _guard = self.lock.lock();

        let handle = self.handle();
        if handle.is_null() {
            let mut list = RawList::with_capacity(self.policy.initial_capacity);
            list.uids.push(uid);
            let handle = self.arena.allocate(Repr::Raw(list))?;
            self.publish(handle);
            return Ok(());
        }

        let repr = self.arena.resolve(handle)?;
        let list = match &*repr {
            Repr::Dense(dense) => {
                dense.insert(uid);
                return Ok(());
            }
            Repr::Raw(list) => list,
        };
        if list.contains(uid) {
            return Ok(());
        }

        let len = list.len() as u32 + 1;
        if len > self.policy.upgrade_threshold {
            let dense = DenseBitmap::from_uids(list.as_slice().iter().copied().chain([uid]));
            let upgraded = self.arena.allocate(Repr::Dense(dense))?;
            self.publish(upgraded);
            self.retire(handle);
            tracing::debug!(members = len, ?upgraded, "raw list upgraded to dense bitmap");
        } else if len > list.capacity() {
            let capacity = (list.capacity() * 2).clamp(len, self.policy.max_capacity.max(len));
            let grown = self.arena.allocate(Repr::Raw(list.pushed(uid, capacity)))?;
            self.publish(grown);
            self.retire(handle);
            tracing::debug!(capacity, ?grown, "raw list reallocated");
        } else {
            self.arena
                .replace(handle, Repr::Raw(list.pushed(uid, list.capacity())))?;
        }
        Ok(())
    }

    /// Removes `uid`. The representation never shrinks.
    pub fn unset(&self, uid: Uid) -> Result<()> {
        check_uid(uid)?;
        let _guard = self.lock.lock();

        let handle = self.handle();
        if handle.is_null() {
            return Ok(());
        }
        let repr = self.arena.resolve(handle)?;
        match &*repr {
            Repr::Dense(dense) => {
                dense.remove(uid);
            }
            Repr::Raw(list) => {
                if let Some(pos) = list.as_slice().iter().position(|&u| u == uid) {
                    self.arena.replace(handle, Repr::Raw(list.removed(pos)))?;
                }
            }
        }
        Ok(())
    }

    /// Captures the current representation for lock-free reading.
    pub fn snapshot(&self) -> BitsetView {
        loop {
            let handle = self.handle();
            if handle.is_null() {
                return BitsetView::empty();
            }
            match self.arena.resolve(handle) {
                Ok(repr) => return BitsetView::new(repr),
                // Retired between load and resolve; a newer handle is
                // already published.
                Err(_) => std::hint::spin_loop(),
            }
        }
    }

    /// Returns true if `uid` is a member.
    pub fn contains(&self, uid: Uid) -> bool {
        self.snapshot().has(uid)
    }

    /// Upper-bound cardinality estimate, for query planning only.
    pub fn approx_capacity(&self) -> u32 {
        self.snapshot().approx_capacity()
    }

    /// Exact member count at the time of the call.
    pub fn len(&self) -> u32 {
        self.snapshot().len()
    }

    /// Returns true if there are no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current representation kind.
    pub fn kind(&self) -> ReprKind {
        self.snapshot().kind()
    }

    /// Visits `(span, mask)` blocks from the highest uid down to 0.
    pub fn for_each_block(&self, max_uid: Uid, f: &mut BlockVisitor<'_>) -> ControlFlow<()> {
        self.snapshot().visit_blocks(max_uid, f)
    }

    /// Copies the members into a roaring bitmap.
    pub fn to_roaring(&self) -> RoaringBitmap {
        self.snapshot().to_roaring()
    }
}

impl fmt::Debug for HierarchicalBitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchicalBitset")
            .field("handle", &self.handle())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> Arc<BitsetArena> {
        Arc::new(BitsetArena::with_capacity(1024))
    }

    fn collect(set: &HierarchicalBitset, max_uid: Uid) -> Vec<Uid> {
        let mut out = Vec::new();
        let _ = set.for_each_block(max_uid, &mut |span, mask| {
            out.extend(BlockUids::new(span, mask));
            ControlFlow::Continue(())
        });
        out
    }

    #[test]
    fn test_block_uids_descending() {
        let uids: Vec<Uid> = BlockUids::new(64, 0b1000_0101).collect();
        assert_eq!(uids, vec![71, 66, 64]);
        assert_eq!(BlockUids::new(0, 0).count(), 0);
    }

    #[test]
    fn test_empty_set() {
        let set = HierarchicalBitset::new(arena());
        assert_eq!(set.kind(), ReprKind::Empty);
        assert!(set.handle().is_null());
        assert!(!set.contains(0));
        assert_eq!(set.approx_capacity(), 0);
        assert!(collect(&set, Uid::MAX).is_empty());
    }

    #[test]
    fn test_raw_list_growth() {
        let arena = arena();
        let set = HierarchicalBitset::new(arena.clone());

        set.set(5).unwrap();
        let first = set.handle();
        assert_eq!(set.approx_capacity(), 4);

        for uid in [1, 9, 3] {
            set.set(uid).unwrap();
        }
        // Filled within capacity: same slot.
        assert_eq!(set.handle(), first);

        set.set(7).unwrap();
        assert_ne!(set.handle(), first);
        assert_eq!(set.approx_capacity(), 8);
        assert_eq!(set.kind(), ReprKind::Raw);
        assert_eq!(arena.live(), 1);
        assert!(matches!(arena.resolve(first), Err(Error::StaleHandle(_))));
    }

    #[test]
    fn test_set_is_idempotent() {
        let set = HierarchicalBitset::new(arena());
        set.set(3).unwrap();
        set.set(3).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_upgrade_preserves_members() {
        let set = HierarchicalBitset::new(arena());
        let uids: Vec<Uid> = (0..200).map(|i| i * 37 + 1).collect();
        for &uid in &uids {
            set.set(uid).unwrap();
        }
        assert_eq!(set.kind(), ReprKind::Dense);
        assert_eq!(set.len(), uids.len() as u32);
        for &uid in &uids {
            assert!(set.contains(uid), "missing {}", uid);
        }
        assert!(!set.contains(2));
        assert!(!set.contains(UID_LIMIT));
    }

    #[test]
    fn test_upgrade_threshold_from_policy() {
        let policy = GrowthPolicy {
            initial_capacity: 2,
            max_capacity: 4,
            upgrade_threshold: 3,
        };
        let set = HierarchicalBitset::with_policy(arena(), policy);
        for uid in 1..=3 {
            set.set(uid).unwrap();
        }
        assert_eq!(set.kind(), ReprKind::Raw);
        set.set(4).unwrap();
        assert_eq!(set.kind(), ReprKind::Dense);
    }

    #[test]
    fn test_dense_never_reverts() {
        let set = HierarchicalBitset::new(arena());
        for uid in 0..100 {
            set.set(uid).unwrap();
        }
        for uid in 0..100 {
            set.unset(uid).unwrap();
        }
        assert_eq!(set.kind(), ReprKind::Dense);
        assert!(set.is_empty());
        assert!(collect(&set, Uid::MAX).is_empty());
    }

    #[test]
    fn test_raw_unset_keeps_list() {
        let set = HierarchicalBitset::new(arena());
        set.set(1).unwrap();
        set.set(2).unwrap();
        set.unset(1).unwrap();
        set.unset(99).unwrap();
        assert!(!set.contains(1));
        assert!(set.contains(2));
        set.unset(2).unwrap();
        assert_eq!(set.kind(), ReprKind::Raw);
        assert!(set.is_empty());
    }

    #[test]
    fn test_uid_out_of_range() {
        let set = HierarchicalBitset::new(arena());
        let err = set.set(UID_LIMIT).unwrap_err();
        assert!(matches!(err, Error::UidOutOfRange { .. }));
        assert!(set.unset(u32::MAX).is_err());
        set.set(UID_LIMIT - 1).unwrap();
        assert!(set.contains(UID_LIMIT - 1));
    }

    #[test]
    fn test_iteration_descending_with_max() {
        let set = HierarchicalBitset::new(arena());
        let uids = [0, 31, 32, 1023, 1024, 40_000, 1_000_000, UID_LIMIT - 1];
        for uid in uids {
            set.set(uid).unwrap();
        }
        for uid in 2000..2100 {
            set.set(uid).unwrap();
        }
        assert_eq!(set.kind(), ReprKind::Dense);

        let all = collect(&set, Uid::MAX);
        let mut expected: Vec<Uid> = uids.iter().copied().chain(2000..2100).collect();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(all, expected);

        let bounded = collect(&set, 2050);
        let expected: Vec<Uid> = expected.into_iter().filter(|&u| u <= 2050).collect();
        assert_eq!(bounded, expected);
    }

    #[test]
    fn test_raw_iteration_descending() {
        let set = HierarchicalBitset::new(arena());
        for uid in [5, 900, 3, 64, 70] {
            set.set(uid).unwrap();
        }
        assert_eq!(collect(&set, Uid::MAX), vec![900, 70, 64, 5, 3]);
        assert_eq!(collect(&set, 69), vec![64, 5, 3]);
    }

    #[test]
    fn test_iteration_stops_on_break() {
        let set = HierarchicalBitset::new(arena());
        for uid in 0..500 {
            set.set(uid * 32).unwrap();
        }
        let mut seen = 0;
        let flow = set.for_each_block(Uid::MAX, &mut |_, _| {
            seen += 1;
            if seen == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert!(flow.is_break());
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_snapshot_isolated_from_raw_writes() {
        let set = HierarchicalBitset::new(arena());
        set.set(1).unwrap();
        let view = set.snapshot();
        set.set(2).unwrap();
        assert!(!view.has(2));
        assert!(set.contains(2));
    }

    #[test]
    fn test_arena_exhaustion_keeps_old_repr() {
        let arena = Arc::new(BitsetArena::with_capacity(1));
        let set = HierarchicalBitset::new(arena);
        for uid in 0..4 {
            set.set(uid).unwrap();
        }
        // Growing past capacity needs a second slot.
        let err = set.set(4).unwrap_err();
        assert!(matches!(err, Error::ArenaExhausted { .. }));
        assert_eq!(set.len(), 4);
        assert!(!set.contains(4));
    }

    #[test]
    fn test_arena_exhaustion_on_upgrade_keeps_raw() {
        let arena = Arc::new(BitsetArena::with_capacity(1));
        let policy = GrowthPolicy {
            initial_capacity: 8,
            max_capacity: 8,
            upgrade_threshold: 6,
        };
        let set = HierarchicalBitset::with_policy(arena, policy);
        for uid in 0..6 {
            set.set(uid).unwrap();
        }
        assert_eq!(set.kind(), ReprKind::Raw);

        // The dense bitmap needs a second slot.
        let err = set.set(6).unwrap_err();
        assert!(matches!(err, Error::ArenaExhausted { capacity: 1 }));
        assert_eq!(set.kind(), ReprKind::Raw);
        assert_eq!(set.len(), 6);
        assert!((0..6).all(|uid| set.contains(uid)));
        assert!(!set.contains(6));
    }

    #[test]
    fn test_to_roaring() {
        let set = HierarchicalBitset::new(arena());
        for uid in [3, 1 << 20, 77] {
            set.set(uid).unwrap();
        }
        let bitmap = set.to_roaring();
        assert_eq!(bitmap.len(), 3);
        assert!(bitmap.contains(1 << 20));
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let set = Arc::new(HierarchicalBitset::new(arena()));
        let writers: Vec<_> = (0..4u32)
            .map(|t| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || {
                    for i in 0..500u32 {
                        set.set(i * 4 + t).unwrap();
                    }
                })
            })
            .collect();
        let reader = {
            let set = Arc::clone(&set);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let view = set.snapshot();
                    assert!(view.len() <= 2000);
                }
            })
        };
        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        assert_eq!(set.len(), 2000);
        assert!((0..2000).all(|uid| set.contains(uid)));
    }
}
