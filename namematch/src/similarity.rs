//! Token-set and edit-distance similarity between two normalized names.
//!
//! Both scores live in 0..=100 and are never rounded here. Rounding only happens when a
//! similarity is displayed.

use serde::Serialize;

use crate::normalize::NormalizedText;

/// Raw per-candidate scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityScores {
    pub token_score: f64,
    pub edit_score: f64,
}

impl SimilarityScores {
    /// Weighted blend, `w_token` in [0, 1].
    pub fn combined(&self, w_token: f64) -> f64 {
        combine(self.token_score, self.edit_score, w_token)
    }
}

/// Score a normalized query against a normalized record.
pub fn score(query: &NormalizedText, record: &NormalizedText) -> SimilarityScores {
    SimilarityScores {
        token_score: token_set_ratio(&query.tokens, &record.tokens),
        edit_score: edit_similarity(&query.text, &record.text),
    }
}

pub fn combine(token_score: f64, edit_score: f64, w_token: f64) -> f64 {
    w_token * token_score + (1.0 - w_token) * edit_score
}

/// Round half away from zero to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Token-set ratio over sorted unique token sets.
///
/// With `sect` the shared tokens and `ab`/`ba` the shared tokens followed by each side's
/// leftovers, the score is the best Indel ratio among `(sect, ab)`, `(sect, ba)` and
/// `(ab, ba)`. Word order and repeated tokens do not matter; one side being a subset of
/// the other scores 100.
pub fn token_set_ratio(a: &[String], b: &[String]) -> f64 {
    let mut set_a: Vec<&str> = a.iter().map(String::as_str).collect();
    let mut set_b: Vec<&str> = b.iter().map(String::as_str).collect();
    set_a.sort_unstable();
    set_a.dedup();
    set_b.sort_unstable();
    set_b.dedup();

    match (set_a.is_empty(), set_b.is_empty()) {
        (true, true) => return 100.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    let sect: Vec<&str> = set_a
        .iter()
        .filter(|t| set_b.binary_search(t).is_ok())
        .copied()
        .collect();
    let only_a: Vec<&str> = set_a
        .iter()
        .filter(|t| set_b.binary_search(t).is_err())
        .copied()
        .collect();
    let only_b: Vec<&str> = set_b
        .iter()
        .filter(|t| set_a.binary_search(t).is_err())
        .copied()
        .collect();

    let sect_text = sect.join(" ");
    let ab = join_parts(&sect_text, &only_a.join(" "));
    let ba = join_parts(&sect_text, &only_b.join(" "));

    let mut best = indel_ratio(&ab, &ba);
    if !sect_text.is_empty() {
        best = best
            .max(indel_ratio(&sect_text, &ab))
            .max(indel_ratio(&sect_text, &ba));
    }
    best
}

fn join_parts(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (false, true) => head.to_string(),
        (false, false) => format!("{head} {tail}"),
    }
}

/// Normalized Indel similarity: `100 * (1 - indel / (|x| + |y|))` over chars.
pub fn indel_ratio(x: &str, y: &str) -> f64 {
    let x_chars: Vec<char> = x.chars().collect();
    let y_chars: Vec<char> = y.chars().collect();
    let total = x_chars.len() + y_chars.len();
    if total == 0 {
        return 100.0;
    }
    let indel = total - 2 * lcs_len(&x_chars, &y_chars);
    100.0 * (1.0 - indel as f64 / total as f64)
}

/// Longest common subsequence length, two-row DP.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let n = b.len();
    let mut prev = vec![0usize; n + 1];
    let mut curr = vec![0usize; n + 1];

    for &ca in a {
        for j in 1..=n {
            curr[j] = if ca == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

/// `100 * (1 - levenshtein / max(len, 1))` over chars.
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count()).max(1);
    let distance = strsim::levenshtein(a, b);
    100.0 * (1.0 - distance as f64 / longest as f64)
}
