//! # SieveDB
//!
//! **An in-memory attribute index for filtering and ranking records by id.**
//!
//! SieveDB answers questions like "which users are single, live in Spain and
//! like chess or golf?" and "which cities have the most such users?" over
//! millions of 32-bit record ids, without materializing intermediate sets.
//!
//! ## Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **Adaptive sets** | Short raw lists that upgrade to a three-level bitmap |
//! | **Lazy compounds** | AND/OR evaluated block by block, skipping empty regions |
//! | **Grouped top-K** | Open-addressing accumulators plus in-place quickselect |
//! | **Concurrent reads** | Writers lock one set; readers work on snapshots |
//!
//! ## Quick Start
//!
//! ```rust
//! use sievedb::prelude::*;
//!
//! let index = Index::new();
//! index.insert(1, "status", "single").unwrap();
//! index.insert(1, "country", "Spain").unwrap();
//! index.insert(2, "status", "married").unwrap();
//! index.insert(2, "country", "Spain").unwrap();
//! index.insert(3, "status", "single").unwrap();
//!
//! let query = Query::eq("status", "single").and(Query::eq("country", "Spain"));
//! assert_eq!(index.select(&query, 10).unwrap(), vec![1]);
//! assert_eq!(index.count(&Query::not_null("country")).unwrap(), 2);
//! ```
//!
//! ### Working With Sets Directly
//!
//! ```rust
//! use std::sync::Arc;
//! use sievedb::{BitsetArena, HierarchicalBitset, QuerySet};
//!
//! let arena = Arc::new(BitsetArena::with_capacity(1024));
//! let evens = HierarchicalBitset::new(arena.clone());
//! let threes = HierarchicalBitset::new(arena);
//! for uid in 0..1_000 {
//!     if uid % 2 == 0 {
//!         evens.set(uid).unwrap();
//!     }
//!     if uid % 3 == 0 {
//!         threes.set(uid).unwrap();
//!     }
//! }
//!
//! let mut sixes = QuerySet::and(vec![
//!     QuerySet::leaf(evens.snapshot()),
//!     QuerySet::leaf(threes.snapshot()),
//! ]);
//! assert_eq!(sixes.collect(u32::MAX, 3), vec![996, 990, 984]);
//! ```
//!
//! ## Architecture
//!
//! SieveDB is organized into two crates:
//!
//! - **`sievedb-core`** - Sets, compound evaluation, accumulators, top-K, dictionaries
//! - **`sievedb`** - Main crate that re-exports everything
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`](crate::Result), which uses
//! the [`Error`] enum for error types.
//!
//! ## Thread Safety
//!
//! - [`HierarchicalBitset`], [`ValueDictionary`], [`ClaimTable`] and [`Index`]
//!   are `Sync`; mutation is serialized per set or per table
//! - [`QuerySet`], [`CounterTable`] and [`DedupSet`] are per-query and not shared

// Re-export everything from core
pub use sievedb_core::*;
