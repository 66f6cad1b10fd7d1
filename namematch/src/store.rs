//! NameMatcher - main entry point of the crate
//!
//! Owns the published snapshot (index + result cache + dataset description) behind a
//! `RwLock<Option<Arc<_>>>`. Queries clone the `Arc` and never hold the lock while
//! ranking. A reload builds the next snapshot off-lock and swaps it in one short write,
//! so readers see either the old snapshot or the new one, each with its own cache.
//!
//! Async callers go through `match_async`, which runs the query on tokio's blocking pool
//! (the current runtime, or a process-wide fallback runtime when called outside one).

use std::sync::{Arc, Once};
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::cache::{CacheKey, CachedResults, ResultCache};
use crate::config::EngineConfig;
use crate::indexer::NgramIndex;
use crate::interface::{MatchError, MatchResponse, NameMatcherApi, Query};
use crate::metrics::{MetricsCollector, MetricsSnapshot, RequestObservation, SearchStats, DEFAULT_TOP_K};
use crate::models::SourceRecord;
use crate::normalize::{NormalizedText, Normalizer};
use crate::ranking;
use crate::records::{DatasetInfo, InMemoryStore, RecordStore};

/// Global fallback Tokio runtime for async calls made outside any runtime context.
/// Shared across all matchers and never dropped.
static FALLBACK_RUNTIME: Lazy<std::io::Result<tokio::runtime::Runtime>> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .thread_name("namematch-fallback")
        .enable_all()
        .build()
});

static RAYON_INIT: Once = Once::new();

/// Size the global Rayon pool once, leaving a core for the async runtime.
fn init_rayon() {
    RAYON_INIT.call_once(|| {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let rayon_threads = num_threads.saturating_sub(1).max(1);

        // Fails when the embedding application already built the global pool
        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(rayon_threads)
            .thread_name(|i| format!("namematch-rayon-{}", i))
            .build_global();
    });
}

/// Everything a query needs, published as one unit.
#[derive(Debug)]
struct Snapshot {
    index: NgramIndex,
    cache: ResultCache,
    dataset: DatasetInfo,
}

struct Shared {
    config: EngineConfig,
    normalizer: Normalizer,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    /// Serializes reloads; queries never take it.
    reload_lock: Mutex<()>,
    metrics: MetricsCollector,
}

/// Thread-safe, cheaply cloneable name matcher.
#[derive(Clone)]
pub struct NameMatcher {
    shared: Arc<Shared>,
}

impl NameMatcher {
    /// Matcher with no index yet. Queries fail with `IndexUnavailable` until `reload`.
    pub fn new(config: EngineConfig) -> Self {
        init_rayon();
        let normalizer = Normalizer::new(&config.honorifics);
        Self {
            shared: Arc::new(Shared {
                config,
                normalizer,
                snapshot: RwLock::new(None),
                reload_lock: Mutex::new(()),
                metrics: MetricsCollector::new(),
            }),
        }
    }

    /// Matcher loaded from `store`.
    pub fn from_store(config: EngineConfig, store: &dyn RecordStore) -> Result<Self, MatchError> {
        let matcher = Self::new(config);
        matcher.reload(store)?;
        Ok(matcher)
    }

    /// Matcher over a fixed record list.
    pub fn from_records(config: EngineConfig, records: Vec<SourceRecord>) -> Result<Self, MatchError> {
        Self::from_store(config, &InMemoryStore::new(records))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.shared.normalizer
    }

    /// Description of the published dataset, if any.
    pub fn dataset(&self) -> Option<DatasetInfo> {
        self.current().map(|snapshot| snapshot.dataset.clone())
    }

    fn current(&self) -> Option<Arc<Snapshot>> {
        self.shared.snapshot.read().clone()
    }

    fn runtime_handle() -> Result<tokio::runtime::Handle, MatchError> {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            return Ok(handle);
        }
        match &*FALLBACK_RUNTIME {
            Ok(runtime) => Ok(runtime.handle().clone()),
            Err(e) => Err(MatchError::TaskFailed(format!("fallback runtime unavailable: {e}"))),
        }
    }

    /// Run `match_query` on the blocking pool.
    pub async fn match_async(&self, query: Query) -> Result<MatchResponse, MatchError> {
        let matcher = self.clone();
        let handle = Self::runtime_handle()?;
        handle
            .spawn_blocking(move || matcher.match_query(&query))
            .await?
    }

    fn match_with_snapshot(
        &self,
        snapshot: &Snapshot,
        query: &Query,
        normalized: NormalizedText,
        started: Instant,
    ) -> Result<MatchResponse, MatchError> {
        let key = CacheKey::for_query(query, &normalized);
        if let Some(cached) = snapshot.cache.get(&key) {
            let response = MatchResponse::from_results(&cached, query);
            self.shared.metrics.record(&RequestObservation {
                normalized_query: normalized.text,
                latency: started.elapsed(),
                search: None,
            });
            return Ok(response);
        }

        #[cfg(feature = "perf-log")]
        let t0 = Instant::now();
        let candidates = snapshot.index.candidates(&normalized.text);
        #[cfg(feature = "perf-log")]
        let t1 = Instant::now();

        let outcome = ranking::rank(query, &normalized, &candidates, &snapshot.index)?;

        #[cfg(feature = "perf-log")]
        {
            let t2 = Instant::now();
            tracing::debug!(
                candidates_ms = (t1 - t0).as_secs_f64() * 1000.0,
                rank_ms = (t2 - t1).as_secs_f64() * 1000.0,
                candidates = candidates.len(),
                kept = outcome.candidates_kept,
                "[perf] match"
            );
        }

        let results: CachedResults = outcome.results.into();
        snapshot.cache.put(key, Arc::clone(&results));
        let response = MatchResponse::from_results(&results, query);

        self.shared.metrics.record(&RequestObservation {
            normalized_query: normalized.text,
            latency: started.elapsed(),
            search: Some(SearchStats {
                candidates_before: outcome.candidates_scored,
                candidates_after: outcome.candidates_kept,
                tie_breaks: outcome.tie_breaks,
            }),
        });
        Ok(response)
    }
}

impl NameMatcherApi for NameMatcher {
    fn match_query(&self, query: &Query) -> Result<MatchResponse, MatchError> {
        let started = Instant::now();
        let metrics = &self.shared.metrics;

        if let Err(e) = query.validate() {
            metrics.record_rejected();
            return Err(e);
        }
        let normalized = self.shared.normalizer.normalize(&query.name);
        if normalized.is_empty() {
            metrics.record_rejected();
            return Err(MatchError::invalid("name", "has no usable tokens after normalization"));
        }
        let Some(snapshot) = self.current() else {
            metrics.record_unavailable();
            return Err(MatchError::IndexUnavailable);
        };

        self.match_with_snapshot(&snapshot, query, normalized, started)
    }

    fn reload(&self, store: &dyn RecordStore) -> Result<DatasetInfo, MatchError> {
        let _guard = self.shared.reload_lock.lock();
        let started = Instant::now();

        let loaded = store.load()?;
        let index = NgramIndex::build(loaded.records, &self.shared.normalizer, &self.shared.config)?;
        let snapshot = Arc::new(Snapshot {
            index,
            cache: ResultCache::new(self.shared.config.cache_capacity),
            dataset: loaded.info.clone(),
        });
        let records = snapshot.index.len();

        *self.shared.snapshot.write() = Some(snapshot);

        tracing::info!(
            records,
            storage = loaded.info.storage,
            mode = loaded.info.dataset_mode.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "published new index"
        );
        Ok(loaded.info)
    }

    fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.shared.metrics.snapshot(DEFAULT_TOP_K);
        snapshot.config = Some(self.shared.config.clone());
        snapshot.dataset = self.dataset();
        snapshot
    }

    fn is_ready(&self) -> bool {
        self.shared.snapshot.read().is_some()
    }
}
