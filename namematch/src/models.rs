//! Record types flowing from the record store into the index.

use crate::normalize::NormalizedText;

// ─────────────────────────────────────────────────────────────────────────────
// STORE OUTPUT
// ─────────────────────────────────────────────────────────────────────────────

/// A row as delivered by a record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub id: i64,
    pub raw_name: String,
    /// Store-provided matching key (e.g. a precomputed `strict_key`). Still passed through
    /// the normalizer at build time.
    pub normalized_name: Option<String>,
}

impl SourceRecord {
    pub fn new(id: i64, raw_name: impl Into<String>) -> Self {
        Self {
            id,
            raw_name: raw_name.into(),
            normalized_name: None,
        }
    }

    pub fn with_normalized(mut self, normalized: impl Into<String>) -> Self {
        self.normalized_name = Some(normalized.into());
        self
    }

    /// Text the index should normalize for this record.
    pub fn matching_text(&self) -> &str {
        self.normalized_name
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .unwrap_or(&self.raw_name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// INDEXED RECORD
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable, index-owned record with its precomputed normalized form and n-grams.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: i64,
    pub raw_name: String,
    pub normalized: NormalizedText,
    /// Distinct n-grams in first-occurrence order.
    pub ngrams: Vec<String>,
}

impl Record {
    pub fn normalized_name(&self) -> &str {
        &self.normalized.text
    }

    pub fn tokens(&self) -> &[String] {
        &self.normalized.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_text_prefers_store_key() {
        let plain = SourceRecord::new(1, "Ana López");
        assert_eq!(plain.matching_text(), "Ana López");

        let keyed = SourceRecord::new(2, "Ana López").with_normalized("ana lopez");
        assert_eq!(keyed.matching_text(), "ana lopez");

        let blank_key = SourceRecord::new(3, "Ana López").with_normalized("  ");
        assert_eq!(blank_key.matching_text(), "Ana López");
    }
}
