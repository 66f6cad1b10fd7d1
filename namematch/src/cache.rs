//! LRU memo of ranked results.
//!
//! Keyed by the effective query (normalized text, threshold, limit, w_token). Lock
//! acquisition is bounded: a contended `get` is reported as a miss and a contended `put`
//! is dropped, so the cache can never stall or fail a request.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;

use crate::interface::Query;
use crate::normalize::NormalizedText;
use crate::ranking::ScoredResult;

/// Longest a request waits for the cache lock.
pub const CACHE_LOCK_TIMEOUT: Duration = Duration::from_millis(5);

pub type CachedResults = Arc<[ScoredResult]>;

/// Effective query identity. `explain` and `include_by_id` only change the response
/// shape, so they are not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    normalized: String,
    threshold_bits: u64,
    limit: usize,
    w_token_bits: u64,
}

impl CacheKey {
    pub fn new(normalized: &str, threshold: f64, limit: usize, w_token: f64) -> Self {
        Self {
            normalized: normalized.to_string(),
            threshold_bits: float_key(threshold),
            limit,
            w_token_bits: float_key(w_token),
        }
    }

    pub fn for_query(query: &Query, normalized: &NormalizedText) -> Self {
        Self::new(&normalized.text, query.threshold, query.limit, query.w_token)
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

/// `-0.0` and `0.0` are the same parameter.
fn float_key(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

pub struct ResultCache {
    /// `None` when capacity is zero.
    entries: Option<Mutex<LruCache<CacheKey, CachedResults>>>,
    lock_timeout: Duration,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("capacity", &self.capacity())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_lock_timeout(capacity, CACHE_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(capacity: usize, lock_timeout: Duration) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            lock_timeout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .as_ref()
            .map_or(0, |entries| entries.lock().cap().get())
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedResults> {
        let entries = self.entries.as_ref()?;
        match entries.try_lock_for(self.lock_timeout) {
            Some(mut guard) => guard.get(key).cloned(),
            None => {
                tracing::debug!(query = key.normalized(), "cache lock contended, treating as miss");
                None
            }
        }
    }

    pub fn put(&self, key: CacheKey, results: CachedResults) {
        let Some(entries) = self.entries.as_ref() else {
            return;
        };
        match entries.try_lock_for(self.lock_timeout) {
            Some(mut guard) => {
                guard.put(key, results);
            }
            None => {
                tracing::debug!(query = key.normalized(), "cache lock contended, skipping insert");
            }
        }
    }

    pub fn clear(&self) {
        if let Some(entries) = self.entries.as_ref() {
            entries.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
