//! Public request/response types and the matcher API.
//!
//! `Query` is validated once, at the boundary. Responses always carry the ranked `results`
//! sequence; `results_by_id` is a projection of that same sequence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{DEFAULT_LIMIT, DEFAULT_THRESHOLD, DEFAULT_W_TOKEN, MAX_LIMIT};
use crate::metrics::MetricsSnapshot;
use crate::ranking::ScoredResult;
use crate::records::{DatasetInfo, RecordStore};
use crate::similarity::round2;

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST
// ═══════════════════════════════════════════════════════════════════════════════

/// One match request. Missing fields take the service defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    pub name: String,
    /// Minimum unrounded similarity, 0..=100.
    pub threshold: f64,
    /// Maximum number of results, 1..=100.
    pub limit: usize,
    /// Weight of the token score, 0..=1. The edit score gets the rest.
    pub w_token: f64,
    /// Include per-result score breakdown.
    pub explain: bool,
    /// Include the `results_by_id` projection.
    pub include_by_id: bool,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            name: String::new(),
            threshold: DEFAULT_THRESHOLD,
            limit: DEFAULT_LIMIT,
            w_token: DEFAULT_W_TOKEN,
            explain: false,
            include_by_id: true,
        }
    }
}

impl Query {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn w_token(mut self, w_token: f64) -> Self {
        self.w_token = w_token;
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn include_by_id(mut self, include_by_id: bool) -> Self {
        self.include_by_id = include_by_id;
        self
    }

    /// Range checks on the numeric parameters. Non-finite values are rejected.
    pub fn validate(&self) -> Result<(), MatchError> {
        if !self.threshold.is_finite() || !(0.0..=100.0).contains(&self.threshold) {
            return Err(MatchError::invalid("threshold", "must be between 0 and 100"));
        }
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(MatchError::invalid("limit", "must be between 1 and 100"));
        }
        if !self.w_token.is_finite() || !(0.0..=1.0).contains(&self.w_token) {
            return Err(MatchError::invalid("w_token", "must be between 0 and 1"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESPONSE
// ═══════════════════════════════════════════════════════════════════════════════

/// One ranked result as returned to callers. Scores are rounded for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchHit {
    pub id: i64,
    pub name: String,
    pub similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w_token: Option<f64>,
}

impl MatchHit {
    pub fn from_scored(result: &ScoredResult, query: &Query) -> Self {
        let explain = query.explain;
        Self {
            id: result.record_id,
            name: result.name.clone(),
            similarity: result.display_similarity(),
            token_score: explain.then(|| round2(result.token_score)),
            edit_score: explain.then(|| round2(result.edit_score)),
            w_token: explain.then(|| (query.w_token * 1000.0).round() / 1000.0),
        }
    }
}

/// `MatchHit` without the id, used as the value of `results_by_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchById {
    pub name: String,
    pub similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w_token: Option<f64>,
}

impl From<&MatchHit> for MatchById {
    fn from(hit: &MatchHit) -> Self {
        Self {
            name: hit.name.clone(),
            similarity: hit.similarity,
            token_score: hit.token_score,
            edit_score: hit.edit_score,
            w_token: hit.w_token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResponse {
    /// Canonical ranked order.
    pub results: Vec<MatchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_by_id: Option<BTreeMap<i64, MatchById>>,
}

impl MatchResponse {
    pub fn from_results(results: &[ScoredResult], query: &Query) -> Self {
        let hits: Vec<MatchHit> = results
            .iter()
            .map(|r| MatchHit::from_scored(r, query))
            .collect();
        let results_by_id = query
            .include_by_id
            .then(|| hits.iter().map(|hit| (hit.id, MatchById::from(hit))).collect());
        Self {
            results: hits,
            results_by_id,
        }
    }

    pub fn ids(&self) -> Vec<i64> {
        self.results.iter().map(|hit| hit.id).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for matcher operations
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Invalid parameter {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },
    #[error("Index not available yet")]
    IndexUnavailable,
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Record store error: {0}")]
    Store(String),
    #[error("Index error: {0}")]
    Index(String),
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl MatchError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        MatchError::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }

    /// Whether the same request may succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MatchError::IndexUnavailable | MatchError::TaskFailed(_))
    }
}

impl From<crate::records::RecordStoreError> for MatchError {
    fn from(e: crate::records::RecordStoreError) -> Self {
        MatchError::Store(e.to_string())
    }
}

impl From<crate::indexer::IndexerError> for MatchError {
    fn from(e: crate::indexer::IndexerError) -> Self {
        MatchError::Index(e.to_string())
    }
}

impl From<crate::ranking::RankError> for MatchError {
    fn from(e: crate::ranking::RankError) -> Self {
        MatchError::InvariantViolation(e.to_string())
    }
}

impl From<tokio::task::JoinError> for MatchError {
    fn from(e: tokio::task::JoinError) -> Self {
        MatchError::TaskFailed(e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVICE INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// Operations a name matcher exposes to its callers.
pub trait NameMatcherApi: Send + Sync {
    /// Rank the dataset against one query.
    fn match_query(&self, query: &Query) -> Result<MatchResponse, MatchError>;

    /// Rebuild the index from a full store load and publish it with an empty cache.
    fn reload(&self, store: &dyn RecordStore) -> Result<DatasetInfo, MatchError>;

    /// Counters plus the active configuration and dataset.
    fn metrics(&self) -> MetricsSnapshot;

    /// Whether an index has been published.
    fn is_ready(&self) -> bool;
}
