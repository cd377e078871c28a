//! Lazily evaluated AND/OR combinations of bitsets.
//!
//! A [`QuerySet`] is built once per query from member views and then read
//! through the [`IndexableSet`] interface. Nothing is materialized up front
//! except the coarse L1 summary; L2 words and L3 blocks are combined the
//! first time they are asked for and cached.
//!
//! For AND, an L2 word that turns out to be zero clears its L1 bit, and a
//! block that turns out to be zero clears its L2 bit, so later walks skip the
//! region without asking the members again.

use std::ops::ControlFlow;

use roaring::RoaringBitmap;

use crate::bitset::{
    bit_of, clear_bit, has_bit, scan_block, scan_l1, scan_l2, set_bit, span_of, walk_blocks,
    walk_sorted_uids, BitsetView, BlockUids, BlockVisitor, IndexableSet, ReprKind, Uid, L1_WORDS,
    L2_WORDS, UID_LIMIT,
};

/// Boolean combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Intersection.
    And,
    /// Union.
    Or,
}

/// A set that queries can read: a single bitset view or a compound.
#[derive(Debug)]
pub enum QuerySet {
    /// Matches nothing.
    Empty,
    /// One bitset (raw list or dense).
    Leaf(BitsetView),
    /// Raw list scanned and filtered against the AND of other members.
    RawFiltered(Box<RawFiltered>),
    /// Intersection of members.
    And(Box<AndSet>),
    /// Union of members.
    Or(Box<OrSet>),
}

impl From<BitsetView> for QuerySet {
    fn from(view: BitsetView) -> Self {
        QuerySet::leaf(view)
    }
}

impl QuerySet {
    /// Wraps a single bitset view.
    pub fn leaf(view: BitsetView) -> Self {
        if view.kind() == ReprKind::Empty {
            QuerySet::Empty
        } else {
            QuerySet::Leaf(view)
        }
    }

    /// Builds a compound of `members` with the given mode.
    pub fn build(mode: Mode, members: Vec<QuerySet>) -> Self {
        match mode {
            Mode::And => Self::and(members),
            Mode::Or => Self::or(members),
        }
    }

    /// Intersection of `members`.
    ///
    /// Zero members or any empty member give [`QuerySet::Empty`]; a single
    /// member is returned as is. If any member is a raw list the result scans
    /// that list and filters it through the AND of the others.
    pub fn and(mut members: Vec<QuerySet>) -> Self {
        if members.is_empty() || members.iter().any(QuerySet::is_known_empty) {
            return QuerySet::Empty;
        }
        if members.len() == 1 {
            return members.swap_remove(0);
        }
        if let Some(pos) = members.iter().position(QuerySet::is_raw) {
            let QuerySet::Leaf(raw) = members.swap_remove(pos) else {
                unreachable!("is_raw only matches raw leaves")
            };
            tracing::trace!(
                raw_len = raw.len(),
                others = members.len(),
                "AND collapsed to raw list scan"
            );
            return QuerySet::RawFiltered(Box::new(RawFiltered {
                raw,
                filter: QuerySet::and(members),
                survivors: None,
            }));
        }

        members.sort_by_key(QuerySet::approx_len);
        let mut l1 = [u32::MAX; L1_WORDS];
        for member in &mut members {
            let ml1 = member.l1_summary();
            for (w, m) in l1.iter_mut().zip(ml1.iter()) {
                *w &= m;
            }
        }
        tracing::trace!(members = members.len(), "built AND set");
        QuerySet::And(Box::new(AndSet {
            members,
            l1,
            l2_filled: [0; L1_WORDS],
            l2: vec![0; L2_WORDS].into_boxed_slice(),
            last: None,
        }))
    }

    /// Union of `members`. Empty members are dropped.
    pub fn or(mut members: Vec<QuerySet>) -> Self {
        members.retain(|m| !m.is_known_empty());
        if members.is_empty() {
            return QuerySet::Empty;
        }
        if members.len() == 1 {
            return members.swap_remove(0);
        }

        let mut l1 = [0u32; L1_WORDS];
        for member in &mut members {
            let ml1 = member.l1_summary();
            for (w, m) in l1.iter_mut().zip(ml1.iter()) {
                *w |= m;
            }
        }
        tracing::trace!(members = members.len(), "built OR set");
        QuerySet::Or(Box::new(OrSet {
            members,
            l1,
            l2_filled: [0; L1_WORDS],
            l2: vec![0; L2_WORDS].into_boxed_slice(),
            last: None,
        }))
    }

    fn is_known_empty(&self) -> bool {
        match self {
            QuerySet::Empty => true,
            QuerySet::Leaf(view) => view.is_empty(),
            _ => false,
        }
    }

    fn is_raw(&self) -> bool {
        matches!(self, QuerySet::Leaf(view) if view.kind() == ReprKind::Raw)
    }

    /// Collects up to `limit` members not above `max_uid`, highest first.
    pub fn collect(&mut self, max_uid: Uid, limit: usize) -> Vec<Uid> {
        let mut out = Vec::with_capacity(limit.min(1024));
        if limit == 0 {
            return out;
        }
        let _ = self.for_each_block(max_uid, &mut |span, mask| {
            for uid in BlockUids::new(span, mask) {
                out.push(uid);
                if out.len() == limit {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        });
        out
    }

    /// Number of members.
    pub fn count(&mut self) -> u64 {
        let mut count = 0u64;
        let _ = self.for_each_block(Uid::MAX, &mut |_, mask| {
            count += mask.count_ones() as u64;
            ControlFlow::Continue(())
        });
        count
    }

    /// Materializes the members into a roaring bitmap.
    pub fn to_roaring(&mut self) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        let _ = self.for_each_block(Uid::MAX, &mut |span, mask| {
            out.extend(BlockUids::new(span, mask));
            ControlFlow::Continue(())
        });
        out
    }
}

impl IndexableSet for QuerySet {
    fn l1_summary(&mut self) -> [u32; L1_WORDS] {
        match self {
            QuerySet::Empty => [0; L1_WORDS],
            QuerySet::Leaf(view) => view.l1_summary(),
            QuerySet::RawFiltered(set) => set.l1_summary(),
            QuerySet::And(set) => set.l1,
            QuerySet::Or(set) => set.l1,
        }
    }

    fn l2_word(&mut self, l2ix: usize) -> u32 {
        match self {
            QuerySet::Empty => 0,
            QuerySet::Leaf(view) => view.l2_word(l2ix),
            QuerySet::RawFiltered(set) => set.l2_word(l2ix),
            QuerySet::And(set) => set.l2_word(l2ix),
            QuerySet::Or(set) => set.l2_word(l2ix),
        }
    }

    fn block(&mut self, span: Uid) -> u32 {
        match self {
            QuerySet::Empty => 0,
            QuerySet::Leaf(view) => view.block(span),
            QuerySet::RawFiltered(set) => set.block(span),
            QuerySet::And(set) => set.block(span),
            QuerySet::Or(set) => set.block(span),
        }
    }

    fn approx_len(&self) -> u32 {
        match self {
            QuerySet::Empty => 0,
            QuerySet::Leaf(view) => view.approx_capacity(),
            QuerySet::RawFiltered(set) => set.approx_len(),
            QuerySet::And(set) => set.approx_len(),
            QuerySet::Or(set) => set.approx_len(),
        }
    }

    fn contains(&mut self, uid: Uid) -> bool {
        match self {
            QuerySet::Empty => false,
            QuerySet::Leaf(view) => view.has(uid),
            QuerySet::RawFiltered(set) => set.contains(uid),
            QuerySet::And(set) => set.contains(uid),
            QuerySet::Or(set) => set.contains(uid),
        }
    }

    fn for_each_block(&mut self, max_uid: Uid, f: &mut BlockVisitor<'_>) -> ControlFlow<()> {
        match self {
            QuerySet::Empty => ControlFlow::Continue(()),
            QuerySet::Leaf(view) => view.visit_blocks(max_uid, f),
            QuerySet::RawFiltered(set) => set.for_each_block(max_uid, f),
            QuerySet::And(set) => walk_blocks(set.as_mut(), max_uid, f),
            QuerySet::Or(set) => walk_blocks(set.as_mut(), max_uid, f),
        }
    }
}

/// A raw list filtered through the AND of the remaining members.
///
/// Cheaper than building summaries when the list holds a handful of uids.
#[derive(Debug)]
pub struct RawFiltered {
    raw: BitsetView,
    filter: QuerySet,
    // Sorted descending once computed.
    survivors: Option<Vec<Uid>>,
}

impl RawFiltered {
    fn survivors(&mut self) -> &[Uid] {
        if self.survivors.is_none() {
            let filter = &mut self.filter;
            let mut uids: Vec<Uid> = self
                .raw
                .raw_uids()
                .unwrap_or_default()
                .iter()
                .copied()
                .filter(|&uid| filter.contains(uid))
                .collect();
            uids.sort_unstable_by(|a, b| b.cmp(a));
            uids.dedup();
            self.survivors = Some(uids);
        }
        self.survivors.as_deref().unwrap_or_default()
    }
}

impl IndexableSet for RawFiltered {
    fn l1_summary(&mut self) -> [u32; L1_WORDS] {
        scan_l1(self.survivors())
    }

    fn l2_word(&mut self, l2ix: usize) -> u32 {
        scan_l2(self.survivors(), l2ix)
    }

    fn block(&mut self, span: Uid) -> u32 {
        scan_block(self.survivors(), span)
    }

    fn approx_len(&self) -> u32 {
        match &self.survivors {
            Some(uids) => uids.len() as u32,
            None => self.raw.len(),
        }
    }

    fn contains(&mut self, uid: Uid) -> bool {
        match &self.survivors {
            Some(uids) => uids.contains(&uid),
            None => self.raw.has(uid) && self.filter.contains(uid),
        }
    }

    fn for_each_block(&mut self, max_uid: Uid, f: &mut BlockVisitor<'_>) -> ControlFlow<()> {
        if let Some(uids) = &self.survivors {
            return walk_sorted_uids(uids, max_uid, f);
        }
        // Filter while walking so an early break skips the remaining checks.
        let mut sorted = self.raw.raw_uids().unwrap_or_default().to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();
        let filter = &mut self.filter;
        let mut current: Option<(Uid, u32)> = None;
        for uid in sorted.into_iter().filter(|&u| u <= max_uid) {
            if !filter.contains(uid) {
                continue;
            }
            let span = span_of(uid);
            match current {
                Some((s, mask)) if s == span => current = Some((s, mask | bit_of(uid))),
                Some((s, mask)) => {
                    f(s, mask)?;
                    current = Some((span, bit_of(uid)));
                }
                None => current = Some((span, bit_of(uid))),
            }
        }
        if let Some((s, mask)) = current {
            f(s, mask)?;
        }
        ControlFlow::Continue(())
    }
}

/// Intersection with lazily filled, self-pruning summaries.
#[derive(Debug)]
pub struct AndSet {
    members: Vec<QuerySet>,
    l1: [u32; L1_WORDS],
    // Bit i set once L2 word i has been computed.
    l2_filled: [u32; L1_WORDS],
    l2: Box<[u32]>,
    last: Option<(Uid, u32)>,
}

impl AndSet {
    /// Members in evaluation order (cheapest first).
    pub fn members(&self) -> &[QuerySet] {
        &self.members
    }

    fn fill_l2(&mut self, l2ix: usize) {
        let mut word = u32::MAX;
        for member in &mut self.members {
            word &= member.l2_word(l2ix);
            if word == 0 {
                break;
            }
        }
        self.l2[l2ix] = word;
        if word == 0 {
            clear_bit(&mut self.l1, l2ix);
        }
        set_bit(&mut self.l2_filled, l2ix);
    }
}

impl IndexableSet for AndSet {
    fn l1_summary(&mut self) -> [u32; L1_WORDS] {
        self.l1
    }

    fn l2_word(&mut self, l2ix: usize) -> u32 {
        if !has_bit(&self.l1, l2ix) {
            return 0;
        }
        if !has_bit(&self.l2_filled, l2ix) {
            self.fill_l2(l2ix);
        }
        self.l2[l2ix]
    }

    fn block(&mut self, span: Uid) -> u32 {
        if let Some((last_span, last_block)) = self.last {
            if last_span == span {
                return last_block;
            }
        }
        if span >= UID_LIMIT {
            return 0;
        }
        let l2ix = (span >> 10) as usize;
        if self.l2_word(l2ix) == 0 || !has_bit(&self.l2, (span >> 5) as usize) {
            return 0;
        }
        let mut block = u32::MAX;
        for member in &mut self.members {
            block &= member.block(span);
            if block == 0 {
                clear_bit(&mut self.l2, (span >> 5) as usize);
                break;
            }
        }
        self.last = Some((span, block));
        block
    }

    fn approx_len(&self) -> u32 {
        self.members
            .iter()
            .map(QuerySet::approx_len)
            .min()
            .unwrap_or(0)
    }
}

/// Union with lazily filled summaries.
#[derive(Debug)]
pub struct OrSet {
    members: Vec<QuerySet>,
    l1: [u32; L1_WORDS],
    l2_filled: [u32; L1_WORDS],
    l2: Box<[u32]>,
    last: Option<(Uid, u32)>,
}

impl OrSet {
    /// Members as given.
    pub fn members(&self) -> &[QuerySet] {
        &self.members
    }

    fn fill_l2(&mut self, l2ix: usize) {
        let word = self
            .members
            .iter_mut()
            .fold(0, |acc, member| acc | member.l2_word(l2ix));
        self.l2[l2ix] = word;
        set_bit(&mut self.l2_filled, l2ix);
    }
}

impl IndexableSet for OrSet {
    fn l1_summary(&mut self) -> [u32; L1_WORDS] {
        self.l1
    }

    fn l2_word(&mut self, l2ix: usize) -> u32 {
        if !has_bit(&self.l1, l2ix) {
            return 0;
        }
        if !has_bit(&self.l2_filled, l2ix) {
            self.fill_l2(l2ix);
        }
        self.l2[l2ix]
    }

    fn block(&mut self, span: Uid) -> u32 {
        if let Some((last_span, last_block)) = self.last {
            if last_span == span {
                return last_block;
            }
        }
        if span >= UID_LIMIT {
            return 0;
        }
        let l2ix = (span >> 10) as usize;
        if self.l2_word(l2ix) == 0 || !has_bit(&self.l2, (span >> 5) as usize) {
            return 0;
        }
        let block = self
            .members
            .iter_mut()
            .fold(0, |acc, member| acc | member.block(span));
        self.last = Some((span, block));
        block
    }

    fn approx_len(&self) -> u32 {
        self.members
            .iter()
            .fold(0u32, |acc, m| acc.saturating_add(m.approx_len()))
    }
}
