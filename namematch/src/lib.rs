//! namematch - approximate name matching with deterministic, explainable ranking
//!
//! Queries are normalized, expanded into character n-grams for candidate recall against an
//! inverted index, scored with a weighted blend of token-set and edit similarity, and
//! ranked by a strict tie-break chain. Results are memoized in an LRU cache that is swapped
//! together with the index on every dataset reload.

pub mod cache;
pub(crate) mod candidate;
pub mod config;
pub mod database;
pub mod indexer;
pub mod interface;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod ranking;
pub mod records;
pub mod similarity;
mod store;

pub use interface::*;
pub use store::NameMatcher;
