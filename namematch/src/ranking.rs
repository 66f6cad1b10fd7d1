//! Deterministic ranking of scored candidates.
//!
//! Results are ordered by a fixed chain where each step only matters when every earlier
//! step ties:
//! 1. similarity, descending (unrounded)
//! 2. token_score, descending
//! 3. edit_score, descending
//! 4. record id, ascending
//!
//! Ids are unique within an index, so the chain is a strict total order. The comparator
//! also reports which step separated two results, and the ranker turns that into
//! tie-break attribution counts over the returned list.

use std::cmp::Ordering;
use std::collections::HashSet;

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::indexer::{Candidate, NgramIndex};
use crate::interface::Query;
use crate::normalize::NormalizedText;
use crate::similarity::{self, round2};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RankError {
    #[error("candidate id {0} appears more than once")]
    DuplicateCandidate(i64),
    #[error("candidate id {0} is not in the index")]
    UnknownRecord(i64),
    #[error("results {0} and {1} are not strictly ordered")]
    AmbiguousOrder(i64, i64),
}

pub type RankResult<T> = Result<T, RankError>;

/// One candidate after scoring. Scores are unrounded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredResult {
    pub record_id: i64,
    pub name: String,
    pub similarity: f64,
    pub token_score: f64,
    pub edit_score: f64,
}

impl ScoredResult {
    pub fn display_similarity(&self) -> f64 {
        round2(self.similarity)
    }
}

/// Chain step that separated two results with equal similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    Token,
    Edit,
    Id,
}

/// Order two results and report the deciding step.
///
/// `None` means similarity alone decided. `(Equal, Some(Id))` only happens for two
/// results with the same id.
pub fn compare_results(a: &ScoredResult, b: &ScoredResult) -> (Ordering, Option<TieBreak>) {
    let by_similarity = b.similarity.total_cmp(&a.similarity);
    if by_similarity != Ordering::Equal {
        return (by_similarity, None);
    }
    let by_token = b.token_score.total_cmp(&a.token_score);
    if by_token != Ordering::Equal {
        return (by_token, Some(TieBreak::Token));
    }
    let by_edit = b.edit_score.total_cmp(&a.edit_score);
    if by_edit != Ordering::Equal {
        return (by_edit, Some(TieBreak::Edit));
    }
    (a.record_id.cmp(&b.record_id), Some(TieBreak::Id))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TieBreakCounts {
    pub token: u64,
    pub edit: u64,
    pub id: u64,
}

impl TieBreakCounts {
    pub fn record(&mut self, step: TieBreak) {
        match step {
            TieBreak::Token => self.token += 1,
            TieBreak::Edit => self.edit += 1,
            TieBreak::Id => self.id += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.token + self.edit + self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankOutcome {
    pub results: Vec<ScoredResult>,
    pub tie_breaks: TieBreakCounts,
    /// Candidates scored, before the threshold.
    pub candidates_scored: usize,
    /// Candidates at or above the threshold, before the limit.
    pub candidates_kept: usize,
}

/// Score, filter, order and cut the candidate set for one query.
pub fn rank(
    query: &Query,
    normalized_query: &NormalizedText,
    candidates: &[Candidate],
    index: &NgramIndex,
) -> RankResult<RankOutcome> {
    let mut seen = HashSet::with_capacity(candidates.len());
    for candidate in candidates {
        if !seen.insert(candidate.record_id) {
            return Err(RankError::DuplicateCandidate(candidate.record_id));
        }
    }

    let scored = candidates
        .par_iter()
        .map(|candidate| {
            let record = index
                .get(candidate.record_id)
                .ok_or(RankError::UnknownRecord(candidate.record_id))?;
            let scores = similarity::score(normalized_query, &record.normalized);
            Ok(ScoredResult {
                record_id: record.id,
                name: record.raw_name.clone(),
                similarity: scores.combined(query.w_token),
                token_score: scores.token_score,
                edit_score: scores.edit_score,
            })
        })
        .collect::<RankResult<Vec<_>>>()?;
    let candidates_scored = scored.len();

    let mut results: Vec<ScoredResult> = scored
        .into_iter()
        .filter(|r| r.similarity >= query.threshold)
        .collect();
    let candidates_kept = results.len();

    results.par_sort_unstable_by(|a, b| compare_results(a, b).0);
    results.truncate(query.limit);

    let mut tie_breaks = TieBreakCounts::default();
    for pair in results.windows(2) {
        match compare_results(&pair[0], &pair[1]) {
            (Ordering::Less, Some(step)) => tie_breaks.record(step),
            (Ordering::Less, None) => {}
            _ => {
                return Err(RankError::AmbiguousOrder(
                    pair[0].record_id,
                    pair[1].record_id,
                ))
            }
        }
    }

    Ok(RankOutcome {
        results,
        tie_breaks,
        candidates_scored,
        candidates_kept,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::SourceRecord;
    use crate::normalize::{normalize, Normalizer};
    use proptest::prelude::*;

    fn result(id: i64, similarity: f64, token: f64, edit: f64) -> ScoredResult {
        ScoredResult {
            record_id: id,
            name: format!("record {id}"),
            similarity,
            token_score: token,
            edit_score: edit,
        }
    }

    fn sample_index() -> NgramIndex {
        let names = [
            (1, "Juan Pérez"),
            (2, "Juana Perez"),
            (3, "María López"),
            (4, "Perez Juan"),
            (5, "Ana Ruiz"),
            (6, "Ana Ruiz"),
            (7, "Ana Ruíz Gómez"),
        ];
        let records = names.iter().map(|(id, name)| SourceRecord::new(*id, *name));
        NgramIndex::build(records, &Normalizer::default(), &EngineConfig::default()).unwrap()
    }

    fn run(index: &NgramIndex, query: &Query) -> RankOutcome {
        let normalized = normalize(&query.name);
        let candidates = index.candidates(&normalized.text);
        rank(query, &normalized, &candidates, index).unwrap()
    }

    // ── compare_results tests ────────────────────────────────────

    #[test]
    fn test_compare_similarity_decides_alone() {
        let a = result(9, 91.0, 10.0, 10.0);
        let b = result(1, 90.0, 100.0, 100.0);
        assert_eq!(compare_results(&a, &b), (Ordering::Less, None));
        assert_eq!(compare_results(&b, &a), (Ordering::Greater, None));
    }

    #[test]
    fn test_compare_token_then_edit_then_id() {
        let a = result(2, 80.0, 90.0, 60.0);
        let b = result(1, 80.0, 85.0, 70.0);
        assert_eq!(compare_results(&a, &b), (Ordering::Less, Some(TieBreak::Token)));

        let c = result(2, 80.0, 90.0, 70.0);
        let d = result(1, 80.0, 90.0, 65.0);
        assert_eq!(compare_results(&c, &d), (Ordering::Less, Some(TieBreak::Edit)));

        let e = result(1, 80.0, 90.0, 70.0);
        let f = result(2, 80.0, 90.0, 70.0);
        assert_eq!(compare_results(&e, &f), (Ordering::Less, Some(TieBreak::Id)));
    }

    #[test]
    fn test_compare_same_id_is_equal() {
        let a = result(4, 80.0, 90.0, 70.0);
        assert_eq!(compare_results(&a, &a.clone()), (Ordering::Equal, Some(TieBreak::Id)));
    }

    #[test]
    fn test_display_similarity_rounds() {
        assert_eq!(result(1, 82.363, 90.0, 68.18).display_similarity(), 82.36);
        assert_eq!(result(1, 99.999, 0.0, 0.0).display_similarity(), 100.0);
    }

    // ── tie-break attribution ────────────────────────────────────

    #[test]
    fn test_edit_tie_break_is_attributed() {
        let mut results = vec![result(1, 80.0, 90.0, 65.0), result(2, 80.0, 90.0, 70.0)];
        results.sort_by(|a, b| compare_results(a, b).0);
        assert_eq!(results[0].record_id, 2);

        let mut counts = TieBreakCounts::default();
        if let (Ordering::Less, Some(step)) = compare_results(&results[0], &results[1]) {
            counts.record(step);
        }
        assert_eq!(counts, TieBreakCounts { token: 0, edit: 1, id: 0 });
        assert_eq!(counts.total(), 1);
    }

    // ── rank tests ───────────────────────────────────────────────

    #[test]
    fn test_rank_exact_match_first() {
        let index = sample_index();
        let outcome = run(&index, &Query::new("juan perez").threshold(0.0));
        assert_eq!(outcome.results[0].record_id, 1);
        assert_eq!(outcome.results[0].name, "Juan Pérez");
        assert_eq!(outcome.results[0].display_similarity(), 100.0);
        assert_eq!(outcome.candidates_scored, outcome.candidates_kept);
    }

    #[test]
    fn test_rank_identical_names_tie_on_id() {
        let index = sample_index();
        let outcome = run(&index, &Query::new("ana ruiz").threshold(100.0));
        let ids: Vec<i64> = outcome.results.iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![5, 6]);
        assert_eq!(outcome.tie_breaks, TieBreakCounts { token: 0, edit: 0, id: 1 });
    }

    #[test]
    fn test_rank_subset_name_ties_on_edit() {
        // "ana ruiz gomez" has a full token-set score too, but a lower edit score
        let index = sample_index();
        let outcome = run(&index, &Query::new("ana ruiz").threshold(0.0).w_token(1.0));
        let ids: Vec<i64> = outcome.results.iter().take(3).map(|r| r.record_id).collect();
        assert_eq!(ids, vec![5, 6, 7]);
        assert_eq!(outcome.tie_breaks.id, 1);
        assert_eq!(outcome.tie_breaks.edit, 1);
    }

    #[test]
    fn test_rank_threshold_and_limit() {
        let index = sample_index();
        let all = run(&index, &Query::new("juan perez").threshold(0.0));
        assert!(all.results.len() >= 3);

        let strict = run(&index, &Query::new("juan perez").threshold(100.0));
        assert_eq!(strict.results.len(), 1);
        assert!(strict.candidates_scored > strict.candidates_kept);

        let limited = run(&index, &Query::new("juan perez").threshold(0.0).limit(1));
        assert_eq!(limited.results.len(), 1);
        assert_eq!(limited.candidates_kept, all.candidates_kept);
        assert_eq!(limited.results[0], all.results[0]);
    }

    #[test]
    fn test_rank_no_candidates() {
        let index = sample_index();
        let outcome = run(&index, &Query::new("xyz").threshold(0.0));
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.candidates_scored, 0);
        assert_eq!(outcome.tie_breaks.total(), 0);
    }

    #[test]
    fn test_rank_rejects_duplicate_candidates() {
        let index = sample_index();
        let query = Query::new("ana");
        let candidates = vec![Candidate::new(5, 3), Candidate::new(5, 3)];
        let err = rank(&query, &normalize("ana"), &candidates, &index).unwrap_err();
        assert_eq!(err, RankError::DuplicateCandidate(5));
    }

    #[test]
    fn test_rank_rejects_unknown_candidates() {
        let index = sample_index();
        let query = Query::new("ana");
        let candidates = vec![Candidate::new(404, 1)];
        let err = rank(&query, &normalize("ana"), &candidates, &index).unwrap_err();
        assert_eq!(err, RankError::UnknownRecord(404));
    }

    proptest! {
        #[test]
        fn prop_results_strictly_ordered(
            name in "(juan|juana|ana|maria|perez|ruiz|lopez|gomez)( (juan|ana|perez|ruiz|lopez)){0,2}",
            threshold in 0.0f64..100.0,
            limit in 1usize..8,
            w_token in 0.0f64..=1.0,
        ) {
            let index = sample_index();
            let query = Query::new(name).threshold(threshold).limit(limit).w_token(w_token);
            let outcome = run(&index, &query);
            prop_assert!(outcome.results.len() <= limit);
            prop_assert!(outcome.results.len() <= outcome.candidates_kept);
            for r in &outcome.results {
                prop_assert!(r.similarity >= threshold);
            }
            for pair in outcome.results.windows(2) {
                prop_assert_eq!(compare_results(&pair[0], &pair[1]).0, Ordering::Less);
            }
        }
    }
}
