//! End-to-end matching behavior through the public API: record stores, reloads,
//! caching and metrics.

use std::path::Path;

use namematch::config::{DatasetMode, EngineConfig};
use namematch::normalize::Normalizer;
use namematch::records::{CsvStore, InMemoryStore, SqliteStore};
use namematch::{MatchError, NameMatcher, NameMatcherApi, Query};

const SAMPLE_CSV: &str = "\
id,Full Name
1,Juan Pérez
2,Juana Perez
3,Dr. Juan Perez
4,María López
5,Pedro Velez
6,Pedro López
";

const SAMPLE_NAMES: &[&str] = &[
    "Juan Pérez",
    "Juana Perez",
    "Dr. Juan Perez",
    "María López",
    "Pedro Velez",
    "Pedro López",
];

fn write_csv(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn memory_matcher(config: EngineConfig) -> NameMatcher {
    NameMatcher::from_store(config, &InMemoryStore::from_names(SAMPLE_NAMES.iter().copied())).unwrap()
}

// ── Record stores ────────────────────────────────────────────────

#[test]
fn test_csv_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), "names.csv", SAMPLE_CSV);
    let store = CsvStore::new(&csv, DatasetMode::Original, Normalizer::default());
    let matcher = NameMatcher::from_store(EngineConfig::default(), &store).unwrap();

    let response = matcher.match_query(&Query::new("Juan Perez")).unwrap();
    // Exact key twice (the honorific is dropped), lowest id first, then the near miss
    assert_eq!(&response.ids()[..3], &[1, 3, 2]);
    assert_eq!(response.results[0].name, "Juan Pérez");
    assert_eq!(response.results[0].similarity, 100.0);

    let dataset = matcher.dataset().unwrap();
    assert_eq!(dataset.storage, "csv");
    assert_eq!(dataset.records, 6);
    assert_eq!(dataset.dataset_path.as_deref(), Some(csv.as_path()));
}

#[test]
fn test_sqlite_store_imports_once() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), "names.csv", SAMPLE_CSV);
    let db = dir.path().join("db").join("names.db");

    let first = SqliteStore::new(&db, &csv, DatasetMode::Original, false, Normalizer::default());
    let matcher = NameMatcher::from_store(EngineConfig::default(), &first).unwrap();
    assert_eq!(matcher.dataset().unwrap().sqlite_loaded_rows, Some(6));
    assert_eq!(&matcher.match_query(&Query::new("juan perez")).unwrap().ids()[..2], &[1, 3]);

    // The table already has rows, so a changed CSV is ignored without force_reload
    write_csv(dir.path(), "names.csv", "id,name\n10,Ana Ruiz\n");
    let info = matcher.reload(&first).unwrap();
    assert_eq!(info.sqlite_loaded_rows, None);
    assert_eq!(info.records, 6);

    let forced = SqliteStore::new(&db, &csv, DatasetMode::Original, true, Normalizer::default());
    let info = matcher.reload(&forced).unwrap();
    assert_eq!(info.sqlite_loaded_rows, Some(1));
    assert_eq!(matcher.match_query(&Query::new("ana ruiz")).unwrap().ids(), vec![10]);
}

#[test]
fn test_standardized_dedupe_keeps_lowest_id() {
    let dir = tempfile::tempdir().unwrap();
    let body = "\
id,name,strict_key
2,JUAN PEREZ,juan perez
1,Juan Pérez,juan perez
3,Ana Ruiz,ana ruiz
";
    let csv = write_csv(dir.path(), "clean.csv", body);

    let store = CsvStore::new(&csv, DatasetMode::StandardizedDedupe, Normalizer::default());
    let matcher = NameMatcher::from_store(EngineConfig::default(), &store).unwrap();
    let response = matcher.match_query(&Query::new("juan perez").threshold(0.0)).unwrap();
    assert!(response.ids().contains(&1));
    assert!(!response.ids().contains(&2));

    let db = dir.path().join("names.db");
    let store = SqliteStore::new(&db, &csv, DatasetMode::StandardizedDedupe, false, Normalizer::default());
    let matcher = NameMatcher::from_store(EngineConfig::default(), &store).unwrap();
    assert_eq!(matcher.dataset().unwrap().records, 2);
}

#[test]
fn test_missing_name_column_fails_load() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), "bad.csv", "id,label\n1,Ana\n");
    let store = CsvStore::new(&csv, DatasetMode::Original, Normalizer::default());
    let err = NameMatcher::from_store(EngineConfig::default(), &store).err().unwrap();
    assert!(matches!(err, MatchError::Store(_)));
}

// ── Ranking contract ─────────────────────────────────────────────

#[test]
fn test_results_respect_threshold_limit_and_order() {
    let matcher = memory_matcher(EngineConfig::default());
    for threshold in [0.0, 40.0, 70.0, 95.0] {
        for limit in [1, 2, 5, 100] {
            let query = Query::new("Pedro Lopez").threshold(threshold).limit(limit);
            let response = matcher.match_query(&query).unwrap();
            assert!(response.results.len() <= limit);
            assert!(response.results.iter().all(|hit| hit.similarity >= threshold - 0.005));
            assert!(response
                .results
                .windows(2)
                .all(|pair| pair[0].similarity >= pair[1].similarity));

            let by_id = response.results_by_id.as_ref().unwrap();
            assert_eq!(by_id.len(), response.results.len());
            for hit in &response.results {
                assert_eq!(by_id[&hit.id].similarity, hit.similarity);
            }
        }
    }
}

#[test]
fn test_query_without_shared_ngrams_is_empty() {
    let matcher = memory_matcher(EngineConfig::default());
    let response = matcher.match_query(&Query::new("qqq").threshold(0.0)).unwrap();
    assert!(response.results.is_empty());
}

#[test]
fn test_repeated_queries_are_deterministic() {
    let first = memory_matcher(EngineConfig::default());
    let second = memory_matcher(EngineConfig::default());
    let query = Query::new("juan perez").threshold(0.0).explain(true);

    let expected = first.match_query(&query).unwrap();
    for _ in 0..5 {
        assert_eq!(first.match_query(&query).unwrap(), expected);
        assert_eq!(second.match_query(&query).unwrap(), expected);
    }
}

#[test]
fn test_cache_is_transparent() {
    let uncached = memory_matcher(EngineConfig {
        cache_capacity: 0,
        ..EngineConfig::default()
    });
    let cached = memory_matcher(EngineConfig::default());

    for name in ["juan perez", "Pedro", "maria lopez", "Juan Perez"] {
        let query = Query::new(name).threshold(30.0).explain(true);
        let cold = uncached.match_query(&query).unwrap();
        cached.match_query(&query).unwrap();
        let warm = cached.match_query(&query).unwrap();
        assert_eq!(cold, warm, "cache changed the answer for {name:?}");
    }

    assert_eq!(uncached.metrics().cache_hits, 0);
    assert!(cached.metrics().cache_hits >= 4);
}

#[test]
fn test_threshold_is_part_of_cache_key() {
    let matcher = memory_matcher(EngineConfig::default());
    let loose = matcher.match_query(&Query::new("juan perez").threshold(0.0)).unwrap();
    let strict = matcher.match_query(&Query::new("juan perez").threshold(99.0)).unwrap();
    assert!(loose.results.len() > strict.results.len());
    assert_eq!(strict.ids(), vec![1, 3]);
}

// ── Reload and concurrency ──────────────────────────────────────

#[test]
fn test_queries_stay_consistent_during_reloads() {
    let matcher = memory_matcher(EngineConfig::default());
    let shifted = InMemoryStore::new(
        SAMPLE_NAMES
            .iter()
            .zip(101..)
            .map(|(name, id)| namematch::models::SourceRecord::new(id, *name))
            .collect(),
    );
    let original = InMemoryStore::from_names(SAMPLE_NAMES.iter().copied());

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let matcher = matcher.clone();
            scope.spawn(move || {
                for _ in 0..50 {
                    let ids = matcher.match_query(&Query::new("juan perez")).unwrap().ids();
                    // Each answer comes from exactly one published snapshot
                    assert!(ids[..2] == [1, 3] || ids[..2] == [101, 103], "mixed ids {ids:?}");
                }
            });
        }
        scope.spawn(|| {
            for round in 0..10 {
                let store = if round % 2 == 0 { &shifted } else { &original };
                matcher.reload(store).unwrap();
            }
        });
    });

    // Last reload published the original ids
    assert_eq!(&matcher.match_query(&Query::new("juan perez")).unwrap().ids()[..2], &[1, 3]);
}

#[tokio::test]
async fn test_match_async_on_runtime() {
    let matcher = memory_matcher(EngineConfig::default());
    let handles: Vec<_> = ["juan perez", "pedro velez", "maria lopez"]
        .into_iter()
        .map(|name| {
            let matcher = matcher.clone();
            tokio::spawn(async move { matcher.match_async(Query::new(name)).await })
        })
        .collect();

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert!(!response.results.is_empty());
    }

    let err = matcher.match_async(Query::new("Juan").w_token(2.0)).await.unwrap_err();
    assert!(matches!(err, MatchError::InvalidParameter { field: "w_token", .. }));
}

// ── Metrics ─────────────────────────────────────────────────────

#[test]
fn test_metrics_json_shape() {
    let matcher = memory_matcher(EngineConfig::default());
    matcher.match_query(&Query::new("juan perez")).unwrap();
    matcher.match_query(&Query::new("Juan Pérez")).unwrap();
    matcher.match_query(&Query::new("pedro")).unwrap();
    let _ = matcher.match_query(&Query::new("!!!"));

    let json = serde_json::to_value(matcher.metrics()).unwrap();
    assert_eq!(json["total_requests"], 3);
    assert_eq!(json["cache_hits"], 1);
    assert_eq!(json["rejected_requests"], 1);
    assert_eq!(json["top_queries"][0]["query"], "juan perez");
    assert_eq!(json["top_queries"][0]["count"], 2);
    assert!(json["latency_ms"]["p95"].as_f64().unwrap() >= 0.0);
    assert_eq!(json["candidates_before"]["samples"], 2);
    // Records 1 and 3 share every score and are separated by id
    assert!(json["tie_break"]["by_id"].as_u64().unwrap() >= 1);
    assert_eq!(json["config"]["ngram_n"], 3);
    assert_eq!(json["dataset"]["storage"], "memory");
    assert_eq!(json["dataset"]["records"], 6);
}
