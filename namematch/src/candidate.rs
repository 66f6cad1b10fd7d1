//! Candidate produced by n-gram recall.
//!
//! Candidates only carry the record id and overlap count. The record itself stays owned by
//! the index, and the ranker reads it through the index for scoring.

/// A record that shares at least the configured minimum of n-grams with the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub record_id: i64,
    /// Number of distinct query n-grams also present in the record.
    pub shared_ngram_count: u32,
}

impl Candidate {
    pub fn new(record_id: i64, shared_ngram_count: u32) -> Self {
        Self {
            record_id,
            shared_ngram_count,
        }
    }
}
