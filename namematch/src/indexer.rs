//! Inverted character n-gram index
//!
//! Built once from a full record store snapshot and read-only afterwards. Each record's
//! normalized name is padded with one space on each side and split into overlapping
//! character n-grams, so names shorter than `n` still produce an n-gram. Posting lists
//! hold record slots in ascending id order.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use thiserror::Error;

pub use crate::candidate::Candidate;
use crate::config::EngineConfig;
use crate::models::{Record, SourceRecord};
use crate::normalize::Normalizer;

/// Error type for index builds
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IndexerError {
    #[error("n-gram size must be at least 1")]
    InvalidNgramSize,
    #[error("duplicate record id {0} in dataset")]
    DuplicateId(i64),
}

pub type IndexerResult<T> = Result<T, IndexerError>;

/// Distinct overlapping character n-grams of `" " + text + " "`, in first-occurrence order.
/// Empty text has no n-grams. A padded text shorter than `n` is its own single n-gram.
pub fn char_ngrams(text: &str, n: usize) -> Vec<String> {
    if text.is_empty() || n == 0 {
        return Vec::new();
    }
    let padded: Vec<char> = std::iter::once(' ')
        .chain(text.chars())
        .chain(std::iter::once(' '))
        .collect();
    if padded.len() <= n {
        return vec![padded.into_iter().collect()];
    }

    let mut seen = HashSet::new();
    let mut grams = Vec::new();
    for window in padded.windows(n) {
        let gram: String = window.iter().collect();
        if seen.insert(gram.clone()) {
            grams.push(gram);
        }
    }
    grams
}

/// Immutable n-gram index over the full record set
#[derive(Debug)]
pub struct NgramIndex {
    n: usize,
    max_candidates: usize,
    min_shared_ngrams: usize,
    /// Sorted by ascending id; a record's slot is its position here.
    records: Vec<Record>,
    slots: HashMap<i64, usize>,
    postings: HashMap<String, Vec<usize>>,
}

impl NgramIndex {
    /// Normalize every record and build the posting lists.
    pub fn build<I>(records: I, normalizer: &Normalizer, config: &EngineConfig) -> IndexerResult<Self>
    where
        I: IntoIterator<Item = SourceRecord>,
    {
        let n = config.ngram_n;
        if n == 0 {
            return Err(IndexerError::InvalidNgramSize);
        }

        let mut sources: Vec<SourceRecord> = records.into_iter().collect();
        sources.sort_by_key(|r| r.id);
        if let Some(pair) = sources.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(IndexerError::DuplicateId(pair[0].id));
        }

        // Indexed par_iter keeps id order through collect
        let records: Vec<Record> = sources
            .into_par_iter()
            .map(|source| {
                let normalized = normalizer.normalize(source.matching_text());
                let ngrams = char_ngrams(&normalized.text, n);
                Record {
                    id: source.id,
                    raw_name: source.raw_name,
                    normalized,
                    ngrams,
                }
            })
            .collect();

        let mut slots = HashMap::with_capacity(records.len());
        let mut postings: HashMap<String, Vec<usize>> = HashMap::new();
        for (slot, record) in records.iter().enumerate() {
            slots.insert(record.id, slot);
            for gram in &record.ngrams {
                postings.entry(gram.clone()).or_default().push(slot);
            }
        }

        tracing::info!(
            records = records.len(),
            distinct_ngrams = postings.len(),
            n,
            "n-gram index built"
        );

        Ok(Self {
            n,
            max_candidates: config.max_candidates.max(1),
            min_shared_ngrams: config.min_shared_ngrams.max(1),
            records,
            slots,
            postings,
        })
    }

    /// Records sharing at least `min_shared_ngrams` n-grams with the query, ordered by id.
    ///
    /// When more than `max_candidates` qualify, the ones with the largest overlap are kept
    /// (ties by ascending id). An empty query has no candidates.
    pub fn candidates(&self, normalized_query: &str) -> Vec<Candidate> {
        let grams = char_ngrams(normalized_query, self.n);
        if grams.is_empty() {
            return Vec::new();
        }

        let mut overlap: HashMap<usize, u32> = HashMap::new();
        for gram in &grams {
            if let Some(posting) = self.postings.get(gram) {
                for &slot in posting {
                    *overlap.entry(slot).or_insert(0) += 1;
                }
            }
        }

        let mut hits: Vec<(usize, u32)> = overlap
            .into_iter()
            .filter(|(_, shared)| *shared as usize >= self.min_shared_ngrams)
            .collect();

        if hits.len() > self.max_candidates {
            hits.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            hits.truncate(self.max_candidates);
        }
        hits.sort_unstable_by_key(|(slot, _)| *slot);

        hits.into_iter()
            .map(|(slot, shared)| Candidate::new(self.records[slot].id, shared))
            .collect()
    }

    pub fn get(&self, id: i64) -> Option<&Record> {
        self.slots.get(&id).map(|&slot| &self.records[slot])
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ngram_size(&self) -> usize {
        self.n
    }

    pub fn distinct_ngrams(&self) -> usize {
        self.postings.len()
    }
}
