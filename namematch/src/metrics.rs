//! Process-wide request metrics.
//!
//! Counters are atomics. Rolling windows and per-query counts sit behind short
//! `parking_lot` mutex sections that only push or bump a value. Candidate-set sizes and
//! tie-break attribution are recorded for cache misses only, since a cached answer was
//! already counted when it was computed.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::ranking::TieBreakCounts;
use crate::records::DatasetInfo;
use crate::similarity::round2;

/// Samples kept per rolling window.
pub const ROLLING_WINDOW: usize = 5000;
/// Distinct normalized queries counted.
pub const MAX_TRACKED_QUERIES: usize = 10_000;
/// Size of the leaderboard kept up to date on every request; bounds the top-k view.
pub const TOP_QUERIES_TRACKED: usize = 32;
pub const DEFAULT_TOP_K: usize = 10;

/// Fixed-size window of recent samples.
#[derive(Debug)]
struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn stats(&self) -> WindowStats {
        WindowStats::from_samples(self.samples.iter().copied().collect())
    }
}

/// Per-query counts plus a bounded leaderboard of the most frequent ones.
///
/// Every query outside `leaders` has a count no larger than the smallest leader count,
/// so the leaderboard is the exact top set and reading it never touches `counts`.
#[derive(Debug, Default)]
struct QueryTally {
    counts: HashMap<String, u64>,
    leaders: Vec<QueryCount>,
}

impl QueryTally {
    fn bump(&mut self, query: &str) {
        let count = if let Some(count) = self.counts.get_mut(query) {
            *count += 1;
            *count
        } else if self.counts.len() < MAX_TRACKED_QUERIES {
            self.counts.insert(query.to_string(), 1);
            1
        } else {
            return;
        };

        if let Some(leader) = self.leaders.iter_mut().find(|l| l.query == query) {
            leader.count = count;
        } else if self.leaders.len() < TOP_QUERIES_TRACKED {
            self.leaders.push(QueryCount {
                query: query.to_string(),
                count,
            });
        } else if let Some(weakest) = self.leaders.iter_mut().min_by_key(|l| l.count) {
            if count > weakest.count {
                *weakest = QueryCount {
                    query: query.to_string(),
                    count,
                };
            }
        }
    }
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sum::<f64>() / n as f64
}

/// `sorted[floor(0.95 * (n - 1))]`, 0 for an empty window.
fn p95(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(f64::total_cmp);
    let idx = (0.95 * (values.len() - 1) as f64).floor() as usize;
    values[idx]
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let value = part as f64 / whole as f64;
    (value * 10_000.0).round() / 10_000.0
}

/// Work done by the ranker for one cache miss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Candidates returned by the index.
    pub candidates_before: usize,
    /// Candidates at or above the threshold.
    pub candidates_after: usize,
    pub tie_breaks: TieBreakCounts,
}

/// One resolved query.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestObservation {
    pub normalized_query: String,
    pub latency: Duration,
    /// `None` for a cache hit.
    pub search: Option<SearchStats>,
}

#[derive(Debug)]
pub struct MetricsCollector {
    started_at: Instant,
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rejected_requests: AtomicU64,
    unavailable_requests: AtomicU64,
    ties_by_token: AtomicU64,
    ties_by_edit: AtomicU64,
    ties_by_id: AtomicU64,
    latency_ms: Mutex<RollingWindow>,
    candidates_before: Mutex<RollingWindow>,
    candidates_after: Mutex<RollingWindow>,
    query_counts: Mutex<QueryTally>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            unavailable_requests: AtomicU64::new(0),
            ties_by_token: AtomicU64::new(0),
            ties_by_edit: AtomicU64::new(0),
            ties_by_id: AtomicU64::new(0),
            latency_ms: Mutex::new(RollingWindow::new(ROLLING_WINDOW)),
            candidates_before: Mutex::new(RollingWindow::new(ROLLING_WINDOW)),
            candidates_after: Mutex::new(RollingWindow::new(ROLLING_WINDOW)),
            query_counts: Mutex::new(QueryTally::default()),
        }
    }

    pub fn record(&self, observation: &RequestObservation) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.latency_ms
            .lock()
            .push(observation.latency.as_secs_f64() * 1000.0);

        self.query_counts.lock().bump(&observation.normalized_query);

        match &observation.search {
            None => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
            }
            Some(search) => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                self.candidates_before
                    .lock()
                    .push(search.candidates_before as f64);
                self.candidates_after
                    .lock()
                    .push(search.candidates_after as f64);
                self.ties_by_token
                    .fetch_add(search.tie_breaks.token, Ordering::Relaxed);
                self.ties_by_edit
                    .fetch_add(search.tie_breaks.edit, Ordering::Relaxed);
                self.ties_by_id
                    .fetch_add(search.tie_breaks.id, Ordering::Relaxed);
            }
        }
    }

    pub fn record_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable(&self) {
        self.unavailable_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Point-in-time view. Configuration and dataset are filled in by the matcher.
    pub fn snapshot(&self, top_k: usize) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let by_token = self.ties_by_token.load(Ordering::Relaxed);
        let by_edit = self.ties_by_edit.load(Ordering::Relaxed);
        let by_id = self.ties_by_id.load(Ordering::Relaxed);
        let ties_total = by_token + by_edit + by_id;

        let mut top_queries = self.query_counts.lock().leaders.clone();
        top_queries.sort_unstable_by(|a, b| b.count.cmp(&a.count).then_with(|| a.query.cmp(&b.query)));
        top_queries.truncate(top_k);

        MetricsSnapshot {
            uptime_seconds: round2(self.uptime().as_secs_f64()),
            total_requests,
            cache_hits,
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_hit_rate: ratio(cache_hits, total_requests),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            unavailable_requests: self.unavailable_requests.load(Ordering::Relaxed),
            latency_ms: window_stats(&self.latency_ms),
            candidates_before: window_stats(&self.candidates_before),
            candidates_after: window_stats(&self.candidates_after),
            tie_break: TieBreakStats {
                ties_total,
                by_token,
                by_edit,
                by_id,
                by_token_pct: ratio(by_token, ties_total),
                by_edit_pct: ratio(by_edit, ties_total),
                by_id_pct: ratio(by_id, ties_total),
            },
            top_queries,
            config: None,
            dataset: None,
        }
    }
}

/// Copies the samples under the lock and sorts them after releasing it.
fn window_stats(window: &Mutex<RollingWindow>) -> WindowStats {
    let samples: Vec<f64> = window.lock().samples.iter().copied().collect();
    WindowStats::from_samples(samples)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowStats {
    pub avg: f64,
    pub p95: f64,
    pub samples: usize,
}

impl WindowStats {
    fn from_samples(samples: Vec<f64>) -> Self {
        Self {
            avg: round2(mean(samples.iter().copied())),
            samples: samples.len(),
            p95: round2(p95(samples)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TieBreakStats {
    /// Adjacent result pairs separated after similarity tied.
    pub ties_total: u64,
    pub by_token: u64,
    pub by_edit: u64,
    pub by_id: u64,
    pub by_token_pct: f64,
    pub by_edit_pct: f64,
    pub by_id_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryCount {
    pub query: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: f64,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub rejected_requests: u64,
    pub unavailable_requests: u64,
    pub latency_ms: WindowStats,
    pub candidates_before: WindowStats,
    pub candidates_after: WindowStats,
    pub tie_break: TieBreakStats,
    pub top_queries: Vec<QueryCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<EngineConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetInfo>,
}
