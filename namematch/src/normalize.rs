//! Text canonicalization shared by dataset records and incoming queries.
//!
//! The pipeline order is fixed: lowercase, strip diacritics, drop honorifics, replace
//! symbols, collapse whitespace, tokenize. Every step is locale independent, and the whole
//! pipeline is a projection (`normalize(normalize(x)) == normalize(x)`).

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::Serialize;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::DEFAULT_HONORIFICS;

/// Normalizer built from the default honorific list.
static DEFAULT_NORMALIZER: Lazy<Normalizer> = Lazy::new(Normalizer::default);

/// Canonical form of a name: single-spaced text plus its whitespace tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct NormalizedText {
    pub text: String,
    pub tokens: Vec<String>,
}

impl NormalizedText {
    fn from_collapsed(text: String) -> Self {
        let tokens = if text.is_empty() {
            Vec::new()
        } else {
            text.split(' ').map(str::to_string).collect()
        };
        Self { text, tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Deterministic name normalizer with a configured honorific list.
#[derive(Debug, Clone)]
pub struct Normalizer {
    honorifics: HashSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_HONORIFICS.iter().copied())
    }
}

impl Normalizer {
    /// Honorifics are folded the same way names are, so `"Dra"` and `"dra"` are equivalent.
    pub fn new<I, S>(honorifics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let honorifics = honorifics
            .into_iter()
            .map(|h| strip_diacritics(&h.as_ref().to_lowercase()))
            .map(|h| h.trim().trim_end_matches('.').to_string())
            .filter(|h| !h.is_empty())
            .collect();
        Self { honorifics }
    }

    pub fn honorifics(&self) -> Vec<&str> {
        let mut list: Vec<&str> = self.honorifics.iter().map(String::as_str).collect();
        list.sort_unstable();
        list
    }

    pub fn normalize(&self, input: &str) -> NormalizedText {
        let folded = strip_diacritics(&input.to_lowercase());
        let without_titles = self.remove_honorifics(&folded);
        let cleaned = replace_symbols(&without_titles);
        NormalizedText::from_collapsed(collapse_whitespace(&cleaned))
    }

    /// Drop every alphanumeric run that is a configured honorific. Separators are kept, so
    /// neighbouring words never merge.
    fn remove_honorifics(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut word = String::new();
        for c in text.chars() {
            if c.is_alphanumeric() {
                word.push(c);
                continue;
            }
            self.flush_word(&mut word, &mut out);
            out.push(c);
        }
        self.flush_word(&mut word, &mut out);
        out
    }

    fn flush_word(&self, word: &mut String, out: &mut String) {
        if !self.honorifics.contains(word.as_str()) {
            out.push_str(word);
        }
        word.clear();
    }
}

/// Normalize with the default honorific list.
pub fn normalize(input: &str) -> NormalizedText {
    DEFAULT_NORMALIZER.normalize(input)
}

/// NFKD decomposition without combining marks. Compatibility decompositions can expose
/// uppercase letters (`㎒` → `MHz`), so the output is lowercased again.
fn strip_diacritics(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

fn replace_symbols(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
