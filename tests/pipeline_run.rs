// tests/pipeline_run.rs
// End-to-end pipeline runs over in-memory collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use market_event_impact::analyze::Direction;
use market_event_impact::ingest::providers::fixture::StaticFeed;
use market_event_impact::ingest::types::{EventSource, OrderBookSnapshot, PriceFeed};
use market_event_impact::pipeline::job::JobOutcome;
use market_event_impact::series::{PricedSeries, DAY_MS, HOUR_MS};
use market_event_impact::store::memory::MemoryStore;
use market_event_impact::store::{
    get_impact, get_job_state, job_key, DynStore, JobStatus, KeyValueStore, StoreError, Table,
    PIPELINE_JOB_KEY,
};
use market_event_impact::{run_pipeline, PipelineContext, RunOptions};

use common::*;

fn opts(now_ms: i64, force: bool) -> RunOptions {
    RunOptions {
        force,
        now_ms,
        timeout: Duration::from_secs(10),
    }
}

async fn impact_count(store: &DynStore) -> usize {
    store.scan_prefix(Table::Impacts, "").await.unwrap().len()
}

/// One subject, patch notes only.
fn patch_only_config() -> market_event_impact::PipelineConfig {
    let mut cfg = config();
    cfg.subjects.truncate(1);
    cfg.providers.retain(|p| p.source == EventSource::PatchNotes);
    cfg
}

#[tokio::test]
async fn economy_patch_scores_five_point_two_five_through_the_pipeline() {
    let feed = Arc::new(
        StaticFeed::new()
            .with_events(
                EventSource::PatchNotes,
                vec![event(EventSource::PatchNotes, "ev-1", T0, "Trade hold changes")],
            )
            .with_series(1, series(&[(T0, 100.0), (T0 + 24 * HOUR_MS, 108.0)])),
    );
    let store = memory_store();
    let ctx = context(patch_only_config(), feed, store.clone());

    let summary = run_pipeline(&ctx, opts(T0 + DAY_MS, true)).await.unwrap();
    assert_eq!(summary.total_jobs, 1);
    assert_eq!(summary.success, 1, "{summary:?}");
    assert_eq!(summary.events_stored, 1);
    assert_eq!(summary.impacts_stored, 1);

    let rec = get_impact(store.as_ref(), EventSource::PatchNotes, 1, "ev-1")
        .await
        .unwrap()
        .expect("impact stored");
    assert_eq!(rec.direction, Direction::Up);
    assert!((rec.returns.h24.unwrap() - 8.0).abs() < 1e-9);
    assert!((rec.impact_score.unwrap() - 5.25).abs() < 0.01);
    assert_eq!(rec.relevance_score, None);

    let job = &summary.jobs[0];
    assert_eq!(job.job_key, "patch_notes:1");
    let forecast = job.forecast.as_ref().expect("forecast attached");
    assert!((-1.0..=1.0).contains(&forecast.final_signal));
    assert!((0.0..=1.0).contains(&forecast.risk_score));
}

#[tokio::test]
async fn second_run_inside_interval_skips_and_writes_nothing() {
    let feed = Arc::new(
        StaticFeed::new()
            .with_events(
                EventSource::PatchNotes,
                vec![
                    event(EventSource::PatchNotes, "p-1", T0, "Trade hold changes"),
                    event(EventSource::PatchNotes, "p-2", T0 + HOUR_MS, "Mirage layout update"),
                ],
            )
            .with_events(
                EventSource::ProPlayers,
                vec![event(EventSource::ProPlayers, "n-1", T0, "s1mple retires")],
            )
            .with_series(1, hourly(T0 - DAY_MS, 96, 40.0, 0.05))
            .with_series(2, hourly(T0 - DAY_MS, 96, 110.0, -0.1)),
    );
    let store = memory_store();
    let ctx = context(config(), feed, store.clone());
    let now = T0 + 3 * DAY_MS;

    let first = run_pipeline(&ctx, opts(now, false)).await.unwrap();
    assert_eq!(first.total_jobs, 4);
    assert_eq!(first.success, 4, "{first:?}");
    assert_eq!(first.impacts_stored, 2 * 2 + 2);
    let stored = impact_count(&store).await;
    assert_eq!(stored, 6);
    let state = get_job_state(store.as_ref(), "patch_notes:1")
        .await
        .unwrap()
        .unwrap();

    let second = run_pipeline(&ctx, opts(now + 60_000, false)).await.unwrap();
    assert_eq!(second.skipped, 4);
    assert_eq!(second.success, 0);
    assert_eq!(second.events_stored, 0);
    assert!(second.jobs.iter().all(|j| j.outcome == JobOutcome::Skipped));
    assert_eq!(impact_count(&store).await, stored);
    // Skips leave the job's state untouched.
    assert_eq!(
        get_job_state(store.as_ref(), "patch_notes:1").await.unwrap().unwrap(),
        state
    );

    // Forcing re-runs everything but upserts onto the same keys.
    let forced = run_pipeline(&ctx, opts(now + 120_000, true)).await.unwrap();
    assert_eq!(forced.success, 4);
    assert_eq!(impact_count(&store).await, stored);
}

#[tokio::test]
async fn each_provider_keeps_its_own_interval() {
    let feed = Arc::new(
        StaticFeed::new()
            .with_series(1, hourly(T0 - DAY_MS, 48, 40.0, 0.0))
            .with_series(2, hourly(T0 - DAY_MS, 48, 110.0, 0.0)),
    );
    let store = memory_store();
    let ctx = context(config(), feed, store.clone());

    run_pipeline(&ctx, opts(T0, false)).await.unwrap();
    // 121 minutes later: pro players (120 min) are due again, patch notes (360 min) are not.
    let later = run_pipeline(&ctx, opts(T0 + 121 * 60_000, false)).await.unwrap();
    for job in &later.jobs {
        let expected = match job.provider {
            EventSource::ProPlayers => JobOutcome::Success,
            EventSource::PatchNotes => JobOutcome::Skipped,
        };
        assert_eq!(job.outcome, expected, "{}", job.job_key);
    }
}

#[tokio::test]
async fn rerun_overwrites_the_impact_record() {
    let feed = Arc::new(
        StaticFeed::new()
            .with_events(
                EventSource::PatchNotes,
                vec![event(EventSource::PatchNotes, "ev-1", T0, "Trade hold changes")],
            )
            .with_series(1, series(&[(T0, 100.0), (T0 + 24 * HOUR_MS, 108.0)])),
    );
    let store = memory_store();
    let ctx = context(patch_only_config(), feed.clone(), store.clone());

    run_pipeline(&ctx, opts(T0 + DAY_MS, true)).await.unwrap();
    feed.set_series(1, series(&[(T0, 100.0), (T0 + 24 * HOUR_MS, 90.0)]));
    run_pipeline(&ctx, opts(T0 + DAY_MS, true)).await.unwrap();

    assert_eq!(impact_count(&store).await, 1);
    let rec = get_impact(store.as_ref(), EventSource::PatchNotes, 1, "ev-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.direction, Direction::Down);
    assert!((rec.returns.h24.unwrap() + 10.0).abs() < 1e-9);
}

#[tokio::test]
async fn unpriced_events_are_persisted_with_nulls() {
    // The only sample lies past every baseline and horizon window.
    let feed = Arc::new(
        StaticFeed::new()
            .with_events(
                EventSource::PatchNotes,
                vec![
                    event(EventSource::PatchNotes, "ev-1", T0, "Trade hold changes"),
                    event(EventSource::PatchNotes, "far", i64::MAX - 1_000, "Premier season reset"),
                ],
            )
            .with_series(1, series(&[(T0 + 30 * DAY_MS, 100.0)])),
    );
    let store = memory_store();
    let ctx = context(patch_only_config(), feed, store.clone());

    let summary = run_pipeline(&ctx, opts(T0 + DAY_MS, true)).await.unwrap();
    assert_eq!(summary.success, 1, "{summary:?}");
    assert_eq!(summary.impacts_stored, 2);

    let rec = get_impact(store.as_ref(), EventSource::PatchNotes, 1, "ev-1")
        .await
        .unwrap()
        .expect("unpriced impact still stored");
    assert_eq!(rec.direction, Direction::Insufficient);
    assert_eq!(rec.impact_score, None);
    assert_eq!(rec.baseline_price, None);
    assert_eq!(rec.returns.h24, None);

    let far = get_impact(store.as_ref(), EventSource::PatchNotes, 1, "far")
        .await
        .unwrap()
        .expect("far-future impact stored");
    assert_eq!(far.impact_score, None);
}

#[tokio::test]
async fn failing_source_is_a_warning_not_a_failure() {
    let feed = Arc::new(
        StaticFeed::new()
            .with_events(
                EventSource::PatchNotes,
                vec![event(EventSource::PatchNotes, "p-1", T0, "Trade hold changes")],
            )
            .with_series(1, hourly(T0 - DAY_MS, 96, 40.0, 0.05))
            .with_series(2, hourly(T0 - DAY_MS, 96, 110.0, 0.0)),
    );
    feed.fail_source(EventSource::ProPlayers, "503 upstream");
    let store = memory_store();
    let ctx = context(config(), feed, store.clone());

    let summary = run_pipeline(&ctx, opts(T0 + 2 * DAY_MS, true)).await.unwrap();
    assert_eq!(summary.failed, 0, "{summary:?}");
    assert_eq!(summary.success, 4);
    assert!(summary
        .warnings
        .iter()
        .any(|w| w == "source pro_players unavailable: 503 upstream"));
    // Deduplicated even though two jobs depend on the source.
    assert_eq!(
        summary
            .warnings
            .iter()
            .filter(|w| w.starts_with("source pro_players"))
            .count(),
        1
    );
    let players = summary
        .jobs
        .iter()
        .find(|j| j.job_key == "pro_players:1")
        .unwrap();
    assert_eq!(players.events_seen, 0);
    assert_eq!(players.impacts_stored, 0);

    let health = ctx.health.snapshot();
    assert_eq!(health[&EventSource::ProPlayers].error_count, 1);
    assert_eq!(health[&EventSource::PatchNotes].ok_count, 1);
}

#[tokio::test]
async fn missing_price_series_fails_only_that_subject() {
    let feed = Arc::new(
        StaticFeed::new()
            .with_events(
                EventSource::PatchNotes,
                vec![event(EventSource::PatchNotes, "p-1", T0, "Trade hold changes")],
            )
            .with_series(1, hourly(T0 - DAY_MS, 96, 40.0, 0.05)),
    );
    let store = memory_store();
    let ctx = context(config(), feed, store.clone());
    let now = T0 + 2 * DAY_MS;

    let summary = run_pipeline(&ctx, opts(now, false)).await.unwrap();
    assert_eq!(summary.success, 2);
    assert_eq!(summary.failed, 2);
    for job in &summary.jobs {
        if job.subject_id == 2 {
            assert_eq!(job.outcome, JobOutcome::Failed);
            assert!(job.message.contains("subject 2"), "{}", job.message);
        } else {
            assert_eq!(job.outcome, JobOutcome::Success);
        }
    }

    let failed = get_job_state(store.as_ref(), &job_key(EventSource::PatchNotes, 2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.last_status, JobStatus::Failed);
    assert_eq!(failed.last_ran_at_ms, Some(now));

    let all = get_job_state(store.as_ref(), PIPELINE_JOB_KEY)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(all.last_status, JobStatus::Failed);
    assert!(all.last_message.contains("2 failed"), "{}", all.last_message);

    // Failed jobs wait out their interval like successful ones.
    let again = run_pipeline(&ctx, opts(now + 60_000, false)).await.unwrap();
    assert_eq!(again.skipped, 4);
}

struct SlowPrices;

#[async_trait]
impl PriceFeed for SlowPrices {
    async fn fetch_price_series(&self, _subject_id: i64, _days: u32) -> Result<PricedSeries> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        anyhow::bail!("unreachable in tests")
    }

    async fn fetch_order_book(&self, _subject_id: i64) -> Result<Option<OrderBookSnapshot>> {
        Ok(None)
    }
}

#[tokio::test]
async fn jobs_past_the_deadline_fail_without_blocking_the_run() {
    let feed = Arc::new(StaticFeed::new());
    let store = memory_store();
    let ctx = PipelineContext::new(config(), feed, Arc::new(SlowPrices), store.clone())
        .with_semantic(Arc::new(
            market_event_impact::semantic::client::DisabledClient,
        ));

    let started = std::time::Instant::now();
    let summary = run_pipeline(
        &ctx,
        RunOptions {
            force: true,
            now_ms: T0,
            timeout: Duration::from_millis(200),
        },
    )
    .await
    .unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(summary.failed, 4);
    assert!(summary.jobs.iter().all(|j| j.outcome == JobOutcome::Failed));
    assert!(summary
        .jobs
        .iter()
        .all(|j| j.message.contains("deadline")), "{:?}", summary.jobs);

    let state = get_job_state(store.as_ref(), "pro_players:2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_status, JobStatus::Failed);
}

/// Memory store that refuses impact writes.
struct ImpactWritesFail {
    inner: MemoryStore,
}

#[async_trait]
impl KeyValueStore for ImpactWritesFail {
    async fn upsert(&self, table: Table, key: &str, record: Value) -> Result<(), StoreError> {
        if table == Table::Impacts {
            return Err(StoreError::Io {
                path: "impacts".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.upsert(table, key, record).await
    }

    async fn get(&self, table: Table, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(table, key).await
    }

    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.scan_prefix(table, prefix).await
    }

    async fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(table, key).await
    }

    fn backend_name(&self) -> &'static str {
        "impact-writes-fail"
    }
}

#[tokio::test]
async fn persistence_failure_fails_the_job_and_is_recorded() {
    let feed = Arc::new(
        StaticFeed::new()
            .with_events(
                EventSource::PatchNotes,
                vec![event(EventSource::PatchNotes, "p-1", T0, "Trade hold changes")],
            )
            .with_series(1, hourly(T0 - DAY_MS, 96, 40.0, 0.05))
            .with_series(2, hourly(T0 - DAY_MS, 96, 110.0, 0.0)),
    );
    let store: DynStore = Arc::new(ImpactWritesFail {
        inner: MemoryStore::new(),
    });
    let ctx = context(config(), feed, store.clone());

    let summary = run_pipeline(&ctx, opts(T0 + 2 * DAY_MS, true)).await.unwrap();
    // Patch-note jobs have an event to store; pro-player jobs have none.
    for job in &summary.jobs {
        match job.provider {
            EventSource::PatchNotes => {
                assert_eq!(job.outcome, JobOutcome::Failed);
                assert!(job.message.contains("disk full"), "{}", job.message);
            }
            EventSource::ProPlayers => assert_eq!(job.outcome, JobOutcome::Success),
        }
    }
    let state = get_job_state(store.as_ref(), "patch_notes:1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_status, JobStatus::Failed);
    assert!(state.last_message.contains("disk full"));
}

#[tokio::test]
async fn retention_trims_old_impacts_after_the_run() {
    let now = T0 + DAY_MS;
    let feed = Arc::new(
        StaticFeed::new()
            .with_events(
                EventSource::PatchNotes,
                vec![
                    event(EventSource::PatchNotes, "fresh", T0, "Trade hold changes"),
                    event(EventSource::PatchNotes, "stale", T0 - 60 * DAY_MS, "Old case drop"),
                ],
            )
            .with_series(1, series(&[(T0, 100.0), (T0 + 24 * HOUR_MS, 108.0)])),
    );
    let mut cfg = patch_only_config();
    cfg.pipeline.retention_days = Some(30);
    let store = memory_store();
    let ctx = context(cfg, feed, store.clone());

    let summary = run_pipeline(&ctx, opts(now, true)).await.unwrap();
    assert_eq!(summary.impacts_stored, 2);
    assert!(get_impact(store.as_ref(), EventSource::PatchNotes, 1, "fresh")
        .await
        .unwrap()
        .is_some());
    assert!(get_impact(store.as_ref(), EventSource::PatchNotes, 1, "stale")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn single_worker_still_drains_every_job() {
    let feed = Arc::new(
        StaticFeed::new()
            .with_series(1, hourly(T0 - DAY_MS, 48, 40.0, 0.0))
            .with_series(2, hourly(T0 - DAY_MS, 48, 110.0, 0.0)),
    );
    let mut cfg = config();
    cfg.pipeline.concurrency = 1;
    let ctx = context(cfg, feed, memory_store());

    let summary = run_pipeline(&ctx, opts(T0, true)).await.unwrap();
    assert_eq!(summary.success, 4);
    let keys: Vec<&str> = summary.jobs.iter().map(|j| j.job_key.as_str()).collect();
    assert_eq!(
        keys,
        vec!["patch_notes:1", "patch_notes:2", "pro_players:1", "pro_players:2"]
    );
}
