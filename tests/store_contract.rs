// tests/store_contract.rs
// Same expectations for every store backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use market_event_impact::config::{StoreBackend, StoreConfig};
use market_event_impact::ingest::providers::fixture::StaticFeed;
use market_event_impact::ingest::types::EventSource;
use market_event_impact::store::file::FileStore;
use market_event_impact::store::memory::MemoryStore;
use market_event_impact::store::sqlite::SqliteStore;
use market_event_impact::store::{
    get_job_state, impacts_for_subject, open_store, DynStore, StoreError, Table,
};
use market_event_impact::series::{DAY_MS, HOUR_MS};
use market_event_impact::{run_pipeline, RunOptions};

use common::*;

async fn exercise(store: DynStore) {
    let name = store.backend_name();

    assert_eq!(store.get(Table::Impacts, "a").await.unwrap(), None, "{name}");

    store.upsert(Table::Impacts, "p:1:a", json!({"v": 1})).await.unwrap();
    store.upsert(Table::Impacts, "p:1:b", json!({"v": 2})).await.unwrap();
    store.upsert(Table::Impacts, "p:10:c", json!({"v": 3})).await.unwrap();
    store.upsert(Table::Events, "p:1:a", json!({"other": true})).await.unwrap();

    // Overwrite at key.
    store.upsert(Table::Impacts, "p:1:a", json!({"v": 9})).await.unwrap();
    assert_eq!(
        store.get(Table::Impacts, "p:1:a").await.unwrap(),
        Some(json!({"v": 9})),
        "{name}"
    );

    // Prefix scans are ordered and do not leak across "1:" / "10:".
    let rows = store.scan_prefix(Table::Impacts, "p:1:").await.unwrap();
    let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["p:1:a", "p:1:b"], "{name}");

    // Tables are independent.
    assert_eq!(store.scan_prefix(Table::Events, "").await.unwrap().len(), 1, "{name}");
    assert!(store.scan_prefix(Table::JobRuns, "").await.unwrap().is_empty(), "{name}");

    assert!(store.delete(Table::Impacts, "p:1:b").await.unwrap(), "{name}");
    assert!(!store.delete(Table::Impacts, "p:1:b").await.unwrap(), "{name}");
    assert_eq!(store.scan_prefix(Table::Impacts, "").await.unwrap().len(), 2, "{name}");
}

#[tokio::test]
async fn memory_store_contract() {
    exercise(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn file_store_contract() {
    let tmp = tempfile::tempdir().unwrap();
    exercise(Arc::new(FileStore::open(tmp.path()).unwrap())).await;
}

#[tokio::test]
async fn sqlite_store_contract() {
    let tmp = tempfile::tempdir().unwrap();
    exercise(Arc::new(SqliteStore::open(tmp.path().join("kv.db")).unwrap())).await;
    exercise(Arc::new(SqliteStore::open(":memory:").unwrap())).await;
}

#[tokio::test]
async fn durable_backends_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    for backend in [StoreBackend::File, StoreBackend::Sqlite] {
        let cfg = StoreConfig {
            backend,
            path: tmp.path().join(format!("{backend:?}").to_lowercase()),
        };
        {
            let store = open_store(&cfg).unwrap();
            store.upsert(Table::JobRuns, "k", json!({"n": 1})).await.unwrap();
        }
        let store = open_store(&cfg).unwrap();
        assert_eq!(
            store.get(Table::JobRuns, "k").await.unwrap(),
            Some(json!({"n": 1})),
            "{backend:?}"
        );
    }
}

#[tokio::test]
async fn undecodable_impact_rows_are_reported_as_corrupt() {
    let store: DynStore = Arc::new(MemoryStore::new());
    store
        .upsert(Table::Impacts, "patch_notes:1:x", json!({"not": "an impact"}))
        .await
        .unwrap();
    let err = impacts_for_subject(store.as_ref(), 1).await.unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }), "{err}");
    assert!(err.to_string().contains("impacts/patch_notes:1:x"));
}

#[tokio::test]
async fn pipeline_state_persists_in_sqlite_across_contexts() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg_store = StoreConfig {
        backend: StoreBackend::Sqlite,
        path: tmp.path().join("pipeline.db"),
    };
    let feed = Arc::new(
        StaticFeed::new()
            .with_events(
                EventSource::PatchNotes,
                vec![event(EventSource::PatchNotes, "ev-1", T0, "Trade hold changes")],
            )
            .with_series(1, series(&[(T0, 100.0), (T0 + 24 * HOUR_MS, 108.0)]))
            .with_series(2, series(&[(T0, 50.0), (T0 + 24 * HOUR_MS, 49.0)])),
    );
    let opts = |now_ms| RunOptions {
        force: false,
        now_ms,
        timeout: Duration::from_secs(10),
    };

    let first = context(config(), feed.clone(), open_store(&cfg_store).unwrap());
    let summary = run_pipeline(&first, opts(T0 + DAY_MS)).await.unwrap();
    assert_eq!(summary.success, 4, "{summary:?}");
    drop(first);

    // A fresh process sees the run state and skips.
    let second = context(config(), feed, open_store(&cfg_store).unwrap());
    let summary = run_pipeline(&second, opts(T0 + DAY_MS + 60_000)).await.unwrap();
    assert_eq!(summary.skipped, 4);
    assert!(get_job_state(second.store.as_ref(), "pipeline:all")
        .await
        .unwrap()
        .is_some());
    assert_eq!(
        impacts_for_subject(second.store.as_ref(), 1).await.unwrap().len(),
        1
    );
}
