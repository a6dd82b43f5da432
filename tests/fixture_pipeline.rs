// tests/fixture_pipeline.rs
// The shipped config and fixture directory, end to end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use market_event_impact::analyze::Direction;
use market_event_impact::config::{PipelineConfig, StoreBackend};
use market_event_impact::ingest::providers::fixture::FixtureDir;
use market_event_impact::ingest::types::EventSource;
use market_event_impact::semantic::client::DisabledClient;
use market_event_impact::store::{impacts_for_subject, open_store};
use market_event_impact::{run_pipeline, PipelineContext, RunOptions};

/// 2025-10-15T00:00:00Z
const NOW: i64 = 1_760_486_400_000;
/// 2025-09-10T12:00:00Z, the trade-hold patch.
const TRADE_HOLD_AT: i64 = 1_757_505_600_000;
/// 2025-10-02T00:00:00Z, the retirement news.
const RETIREMENT_AT: i64 = 1_759_363_200_000;

fn manifest_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(rel)
}

fn shipped_context() -> PipelineContext {
    let body = std::fs::read_to_string(manifest_path("config/pipeline.toml")).unwrap();
    let mut cfg = PipelineConfig::from_toml_str(&body).unwrap();
    cfg.validate().unwrap();
    cfg.store.backend = StoreBackend::Memory;
    cfg.pipeline.fixture_dir = manifest_path("fixtures");
    cfg.pipeline.retention_days = None;

    let fixtures = Arc::new(FixtureDir::new(cfg.pipeline.fixture_dir.clone()));
    let store = open_store(&cfg.store).unwrap();
    PipelineContext::new(cfg, fixtures.clone(), fixtures, store)
        .with_semantic(Arc::new(DisabledClient))
}

#[tokio::test]
async fn shipped_fixtures_run_clean() {
    let ctx = shipped_context();
    let summary = run_pipeline(
        &ctx,
        RunOptions {
            force: false,
            now_ms: NOW,
            timeout: Duration::from_secs(30),
        },
    )
    .await
    .unwrap();

    assert_eq!(summary.total_jobs, 4);
    assert_eq!(summary.success, 4, "{summary:#?}");
    // Four dated patch notes (the untitled one is dropped) and three news items.
    assert_eq!(summary.events_stored, 7);
    assert_eq!(summary.impacts_stored, 2 * 7);
    assert!(summary.jobs.iter().all(|j| j.forecast.is_some()));

    let redline = impacts_for_subject(ctx.store.as_ref(), 1).await.unwrap();
    let trade_hold = redline
        .iter()
        .find(|r| r.provider == EventSource::PatchNotes && r.event_time_ms == TRADE_HOLD_AT)
        .expect("trade hold impact");
    assert_eq!(trade_hold.direction, Direction::Up);
    assert!(trade_hold.returns.h24.unwrap() > 7.0);
    assert!(trade_hold.impact_score.unwrap() > 0.0);

    let asiimov = impacts_for_subject(ctx.store.as_ref(), 2).await.unwrap();
    let retirement = |rs: &[market_event_impact::analyze::ImpactRecord]| {
        rs.iter()
            .find(|r| r.provider == EventSource::ProPlayers && r.event_time_ms == RETIREMENT_AT)
            .cloned()
            .expect("retirement impact")
    };
    let on_awp = retirement(&asiimov);
    let on_ak = retirement(&redline);
    assert_eq!(on_awp.direction, Direction::Down);
    assert!(on_awp.relevance_score.unwrap() > on_ak.relevance_score.unwrap());
    assert_eq!(on_awp.relevance_score, Some(1.0));

    // Every event got a record per subject, and nothing else.
    assert_eq!(redline.len(), 7);
    assert_eq!(asiimov.len(), 7);
}
