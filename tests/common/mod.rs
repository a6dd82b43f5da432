// tests/common/mod.rs
// Shared builders for integration tests.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use market_event_impact::config::PipelineConfig;
use market_event_impact::ingest::providers::fixture::StaticFeed;
use market_event_impact::ingest::types::{EventSource, RawEvent, Subject};
use market_event_impact::semantic::client::DisabledClient;
use market_event_impact::series::{PricePoint, PriceSeries, HOUR_MS};
use market_event_impact::store::memory::MemoryStore;
use market_event_impact::store::DynStore;
use market_event_impact::PipelineContext;

/// 2023-11-14T22:13:20Z
pub const T0: i64 = 1_700_000_000_000;

pub fn subject(id: i64, name: &str) -> Subject {
    let (weapon, skin) = match name.split_once(" | ") {
        Some((w, s)) => (Some(w.to_string()), Some(s.to_string())),
        None => (None, None),
    };
    Subject {
        id,
        name: name.to_string(),
        aliases: Vec::new(),
        weapon,
        skin,
    }
}

pub fn event(source: EventSource, id: &str, published_at_ms: i64, title: &str) -> RawEvent {
    RawEvent {
        id: id.to_string(),
        source,
        published_at_ms,
        title: title.to_string(),
        body: String::new(),
        tags: BTreeSet::new(),
    }
}

pub fn series(points: &[(i64, f64)]) -> PriceSeries {
    PriceSeries::from_points(points.iter().map(|&(t, p)| PricePoint::new(t, p)))
}

/// Hourly prices from `from` for `hours` hours, stepping by `step` each hour.
pub fn hourly(from: i64, hours: i64, start: f64, step: f64) -> PriceSeries {
    PriceSeries::from_points(
        (0..=hours).map(|h| PricePoint::new(from + h * HOUR_MS, start + step * h as f64)),
    )
}

/// Two subjects, both providers enabled, no retention trimming.
pub fn config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.subjects = vec![subject(1, "AK-47 | Redline"), subject(2, "AWP | Asiimov")];
    cfg.pipeline.retention_days = None;
    cfg.pipeline.timeout_secs = 10;
    cfg
}

pub fn memory_store() -> DynStore {
    Arc::new(MemoryStore::new())
}

/// Context over a static feed and an explicit store; the semantic client
/// is disabled regardless of process env.
pub fn context(cfg: PipelineConfig, feed: Arc<StaticFeed>, store: DynStore) -> PipelineContext {
    PipelineContext::new(cfg, feed.clone(), feed, store).with_semantic(Arc::new(DisabledClient))
}
