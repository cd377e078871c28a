//! Attribute index and boolean queries over it.
//!
//! An [`Index`] maps attribute names to [`ValueDictionary`]s that all share
//! one bitset arena. A [`Query`] is a boolean tree over attribute values;
//! [`Index::evaluate`] turns it into a lazily evaluated [`QuerySet`].
//!
//! # Example
//!
//! ```
//! use sievedb_core::{GroupQuery, Index, Query, ScoredUid, SortOrder};
//!
//! let index = Index::new();
//! for (uid, city, sex) in [(1, "Rome", "f"), (2, "Oslo", "m"), (3, "Rome", "m"), (4, "Rome", "f")] {
//!     index.insert(uid, "city", city).unwrap();
//!     index.insert(uid, "sex", sex).unwrap();
//! }
//!
//! let query = Query::eq("city", "Rome").and(Query::eq("sex", "f"));
//! assert_eq!(index.select(&query, 10).unwrap(), vec![4, 1]);
//!
//! // Count matching records per sex among Romans, largest group first.
//! let sexes = index.dictionary("sex").unwrap();
//! let group = GroupQuery::new(5).with_order(SortOrder::Descending);
//! let top = index
//!     .group_top_k(
//!         &Query::eq("city", "Rome"),
//!         &group,
//!         |uid| {
//!             let f = sexes.find("f")?;
//!             let key = if sexes.get_bitset(f)?.contains(uid) { 1 } else { 2 };
//!             Some((key, 1.0))
//!         },
//!         |a, b| a > b,
//!     )
//!     .unwrap();
//! assert_eq!(top, vec![ScoredUid::new(1, 2.0), ScoredUid::new(2, 1.0)]);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::bitset::{BitsetArena, Uid};
use crate::compound::QuerySet;
use crate::config::IndexConfig;
use crate::dictionary::{ValueDictionary, ValueId, MAX_VALUE_LEN};
use crate::error::{Error, Result};
use crate::group::{accumulate, ScoredUid};
use crate::topk::{top_k, SortOrder};

/// Boolean query over attribute values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Query {
    /// Records whose `attr` equals `value`. An empty value means null.
    Eq { attr: String, value: String },
    /// Records whose `attr` equals any of `values`.
    AnyOf { attr: String, values: Vec<String> },
    /// Records with an empty `attr`.
    IsNull { attr: String },
    /// Records with a non-empty `attr`.
    NotNull { attr: String },
    /// Records matching every member. No members matches nothing.
    And { members: Vec<Query> },
    /// Records matching at least one member.
    Or { members: Vec<Query> },
}

impl Query {
    /// `attr == value`.
    pub fn eq(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Eq {
            attr: attr.into(),
            value: value.into(),
        }
    }

    /// `attr` in `values`.
    pub fn any_of<I, S>(attr: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Query::AnyOf {
            attr: attr.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `attr` is empty.
    pub fn is_null(attr: impl Into<String>) -> Self {
        Query::IsNull { attr: attr.into() }
    }

    /// `attr` is set.
    pub fn not_null(attr: impl Into<String>) -> Self {
        Query::NotNull { attr: attr.into() }
    }

    /// Intersection of `members`.
    pub fn all(members: impl IntoIterator<Item = Query>) -> Self {
        Query::And {
            members: members.into_iter().collect(),
        }
    }

    /// Union of `members`.
    pub fn any(members: impl IntoIterator<Item = Query>) -> Self {
        Query::Or {
            members: members.into_iter().collect(),
        }
    }

    /// `self AND other`. Chains of `and` stay flat.
    pub fn and(self, other: Query) -> Self {
        match self {
            Query::And { mut members } => {
                members.push(other);
                Query::And { members }
            }
            q => Query::all([q, other]),
        }
    }

    /// `self OR other`. Chains of `or` stay flat.
    pub fn or(self, other: Query) -> Self {
        match self {
            Query::Or { mut members } => {
                members.push(other);
                Query::Or { members }
            }
            q => Query::any([q, other]),
        }
    }
}

/// Parameters of a grouped top-K query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupQuery {
    /// Number of groups to return.
    pub limit: usize,
    /// Ranking direction.
    pub order: SortOrder,
    /// Estimated number of distinct groups, used to size the accumulator.
    pub expected_groups: usize,
    /// Largest uid to visit.
    pub max_uid: Uid,
}

impl Default for GroupQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            order: SortOrder::Descending,
            expected_groups: 64,
            max_uid: Uid::MAX,
        }
    }
}

impl GroupQuery {
    /// Creates a query returning at most `limit` groups.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Sets the ranking direction. Chainable.
    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Sets the expected group count. Chainable.
    pub fn with_expected_groups(mut self, groups: usize) -> Self {
        self.expected_groups = groups;
        self
    }

    /// Restricts the scan to uids up to `max_uid`. Chainable.
    pub fn with_max_uid(mut self, max_uid: Uid) -> Self {
        self.max_uid = max_uid;
        self
    }
}

/// Attribute catalog: one [`ValueDictionary`] per attribute name.
pub struct Index {
    config: IndexConfig,
    arena: Arc<BitsetArena>,
    attrs: RwLock<HashMap<String, Arc<ValueDictionary>>>,
}

impl Default for Index {
    fn default() -> Self {
        Self::build(IndexConfig::default())
    }
}

impl Index {
    /// Creates an index with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an index with a validated configuration.
    pub fn with_config(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: IndexConfig) -> Self {
        Self {
            arena: Arc::new(BitsetArena::with_capacity(config.arena_capacity)),
            attrs: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Arena shared by every bitset of this index.
    pub fn arena(&self) -> &Arc<BitsetArena> {
        &self.arena
    }

    /// Dictionary of `attr`, if anything was ever inserted under it.
    pub fn dictionary(&self, attr: &str) -> Option<Arc<ValueDictionary>> {
        self.attrs.read().get(attr).cloned()
    }

    /// Names of all known attributes, sorted.
    pub fn attributes(&self) -> Vec<String> {
        let mut names: Vec<_> = self.attrs.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    fn dictionary_or_create(&self, attr: &str) -> Arc<ValueDictionary> {
        if let Some(dict) = self.dictionary(attr) {
            return dict;
        }
        self.attrs
            .write()
            .entry(attr.to_owned())
            .or_insert_with(|| {
                tracing::debug!(attr, "new attribute");
                Arc::new(ValueDictionary::new(self.arena.clone(), &self.config))
            })
            .clone()
    }

    /// Records that `uid` has `value` for `attr`. Empty values mark the
    /// attribute null for that record.
    pub fn insert(&self, uid: Uid, attr: &str, value: &str) -> Result<Option<ValueId>> {
        self.dictionary_or_create(attr).add(value, uid)
    }

    /// Undoes [`insert`](Self::insert). Unknown attributes or values are
    /// ignored.
    pub fn remove(&self, uid: Uid, attr: &str, value: &str) -> Result<()> {
        let Some(dict) = self.dictionary(attr) else {
            return Ok(());
        };
        if value.is_empty() {
            return dict.remove(None, uid);
        }
        match dict.find(value) {
            Some(id) => dict.remove(Some(id), uid),
            None => Ok(()),
        }
    }

    fn value_set(dict: Option<&ValueDictionary>, value: &str) -> Result<QuerySet> {
        if value.len() > MAX_VALUE_LEN {
            return Err(Error::ValueTooLong {
                len: value.len(),
                max: MAX_VALUE_LEN,
            });
        }
        let Some(dict) = dict else {
            return Ok(QuerySet::Empty);
        };
        if value.is_empty() {
            return Ok(QuerySet::leaf(dict.null().snapshot()));
        }
        Ok(dict
            .find(value)
            .and_then(|id| dict.get_bitset(id))
            .map_or(QuerySet::Empty, |bitset| QuerySet::leaf(bitset.snapshot())))
    }

    /// Compiles `query` into a set. Unknown attributes and values match
    /// nothing.
    ///
    /// # Errors
    ///
    /// [`Error::ValueTooLong`] if a queried value could never have been
    /// stored.
    pub fn evaluate(&self, query: &Query) -> Result<QuerySet> {
        match query {
            Query::Eq { attr, value } => Self::value_set(self.dictionary(attr).as_deref(), value),
            Query::AnyOf { attr, values } => {
                let dict = self.dictionary(attr);
                let members = values
                    .iter()
                    .map(|v| Self::value_set(dict.as_deref(), v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(QuerySet::or(members))
            }
            Query::IsNull { attr } => Ok(self
                .dictionary(attr)
                .map_or(QuerySet::Empty, |d| QuerySet::leaf(d.null().snapshot()))),
            Query::NotNull { attr } => Ok(self
                .dictionary(attr)
                .map_or(QuerySet::Empty, |d| QuerySet::leaf(d.not_null().snapshot()))),
            Query::And { members } => Ok(QuerySet::and(
                members
                    .iter()
                    .map(|m| self.evaluate(m))
                    .collect::<Result<_>>()?,
            )),
            Query::Or { members } => Ok(QuerySet::or(
                members
                    .iter()
                    .map(|m| self.evaluate(m))
                    .collect::<Result<_>>()?,
            )),
        }
    }

    /// Up to `limit` matching uids, highest (most recent) first.
    pub fn select(&self, query: &Query, limit: usize) -> Result<Vec<Uid>> {
        Ok(self.evaluate(query)?.collect(Uid::MAX, limit))
    }

    /// Number of matching records.
    pub fn count(&self, query: &Query) -> Result<u64> {
        Ok(self.evaluate(query)?.count())
    }

    /// Groups the records matching `query` and returns the best groups.
    ///
    /// `metric` maps a matching uid to `(group_key, weight)` or `None` to
    /// skip it; weights are summed per group key, which must be non-zero.
    /// Groups are then ranked by total weight with `tie_less` as the
    /// ascending tie-break (see [`select_top_k`](crate::select_top_k)).
    pub fn group_top_k<M, T>(
        &self,
        query: &Query,
        group: &GroupQuery,
        metric: M,
        tie_less: T,
    ) -> Result<Vec<ScoredUid>>
    where
        M: FnMut(Uid) -> Option<(Uid, f64)>,
        T: Fn(Uid, Uid) -> bool,
    {
        let mut set = self.evaluate(query)?;
        let table = accumulate(&mut set, group.max_uid, group.expected_groups, metric);
        tracing::trace!(groups = table.len(), limit = group.limit, "groups accumulated");
        Ok(top_k(table.into_entries(), group.limit, group.order, tie_less))
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("attributes", &self.attrs.read().len())
            .field("live_bitsets", &self.arena.live())
            .finish()
    }
}
