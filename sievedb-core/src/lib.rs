//! # SieveDB Core
//!
//! Core library for SieveDB, an in-memory attribute index for 32-bit record
//! identifiers.
//!
//! Every attribute value owns a set of record ids. Sets start as short raw
//! lists and turn into a three-level bitmap once they grow; boolean queries
//! combine them lazily, skipping empty regions at every level, and grouped
//! results are ranked with an in-place top-K selection.
//!
//! ## Core Types
//!
//! ### Sets
//!
//! - [`HierarchicalBitset`] - Growable id set stored in a shared [`BitsetArena`]
//! - [`BitsetView`] - Point-in-time, lock-free view of a bitset
//! - [`QuerySet`] - Lazily evaluated AND/OR combination of views
//!
//! ### Aggregation
//!
//! - [`CounterTable`] / [`DedupSet`] - Open-addressing accumulators
//! - [`select_top_k`] - Quickselect over accumulated scores
//!
//! ### Catalog
//!
//! - [`ValueDictionary`] - Value → bitset mapping for one attribute
//! - [`ClaimTable`] - Single-owner values
//! - [`Index`] and [`Query`] - Attribute catalog and boolean queries
//! - [`IndexConfig`] - Tunables, loadable from JSON

pub mod arena;
pub mod bitset;
pub mod compound;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod group;
pub mod query;
pub mod topk;

// Re-exports for convenient access
pub use arena::{Arena, Handle};
pub use bitset::{
    BitsetArena, BitsetView, BlockUids, DenseBitmap, GrowthPolicy, HierarchicalBitset,
    IndexableSet, RawList, Repr, ReprKind, Uid, UID_LIMIT,
};
pub use compound::{Mode, QuerySet};
pub use config::IndexConfig;
pub use dictionary::{ClaimTable, StringTable, ValueDictionary, ValueId, MAX_VALUE_LEN};
pub use error::{Error, Result};
pub use group::{accumulate, CounterTable, DedupSet, ScoredUid};
pub use query::{GroupQuery, Index, Query};
pub use topk::{select_top_k, top_k, SortOrder};

/// Re-export commonly used types for convenience.
///
/// # Example
///
/// ```rust
/// use sievedb_core::prelude::*;
///
/// let index = Index::new();
/// index.insert(1, "color", "red").unwrap();
/// let mut set = index.evaluate(&Query::eq("color", "red")).unwrap();
/// assert!(set.contains(1));
/// ```
pub mod prelude {
    pub use crate::{
        ClaimTable, Error, GroupQuery, HierarchicalBitset, Index, IndexConfig, IndexableSet,
        Query, QuerySet, Result, ScoredUid, SortOrder, ValueDictionary, ValueId,
    };
}
