// src/ingest/providers/fixture.rs
//! Offline collaborators.
//!
//! [`FixtureDir`] reads a directory laid out as
//! `patch_notes.xml`, `player_news.json`, `prices/<id>.json`,
//! `orderbook/<id>.json`; [`StaticFeed`] serves data held in memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::ingest::providers::ProviderPayload;
use crate::ingest::types::{
    EventFeed, EventSource, FetchedEvents, OrderBookSnapshot, PriceFeed, RawEvent, SourceStatus,
};
use crate::series::{PricePoint, PriceSeries, PricedSeries, DAY_MS};

#[derive(Debug, Deserialize)]
struct PriceFile {
    #[serde(default = "default_currency")]
    currency: String,
    points: Vec<PricePoint>,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone)]
pub struct FixtureDir {
    dir: PathBuf,
}

impl FixtureDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    async fn load_payload(&self, source: EventSource) -> Result<ProviderPayload> {
        let (file, wrap): (&str, fn(String) -> ProviderPayload) = match source {
            EventSource::PatchNotes => ("patch_notes.xml", ProviderPayload::PatchNotesRss),
            EventSource::ProPlayers => ("player_news.json", ProviderPayload::PlayerNewsJson),
        };
        let path = self.dir.join(file);
        let body = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(wrap(body))
    }
}

#[async_trait]
impl EventFeed for FixtureDir {
    async fn fetch_raw_events(&self, source: EventSource, limit: usize) -> FetchedEvents {
        let parsed = match self.load_payload(source).await {
            Ok(payload) => payload.into_events(),
            Err(e) => Err(e),
        };
        match parsed {
            Ok(mut events) => {
                // Newest first, like the live feeds.
                events.sort_by(|a, b| b.published_at_ms.cmp(&a.published_at_ms));
                events.truncate(limit);
                FetchedEvents {
                    status: SourceStatus::ok(source, events.len()),
                    events,
                }
            }
            Err(e) => FetchedEvents::failed(source, format!("{e:#}")),
        }
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

#[async_trait]
impl PriceFeed for FixtureDir {
    async fn fetch_price_series(&self, subject_id: i64, days: u32) -> Result<PricedSeries> {
        let path = self.dir.join("prices").join(format!("{subject_id}.json"));
        let body = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let file: PriceFile = serde_json::from_str(&body)
            .with_context(|| format!("parsing price file {}", path.display()))?;
        let series = PriceSeries::from_points(file.points);
        let series = match series.last() {
            Some(last) => {
                let from = last.timestamp_ms.saturating_sub(i64::from(days) * DAY_MS);
                PriceSeries::from_points(series.window(from, last.timestamp_ms).iter().copied())
            }
            None => series,
        };
        Ok(PricedSeries {
            currency: file.currency,
            series,
        })
    }

    async fn fetch_order_book(&self, subject_id: i64) -> Result<Option<OrderBookSnapshot>> {
        let path = self.dir.join("orderbook").join(format!("{subject_id}.json"));
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => {
                let ob: OrderBookSnapshot = serde_json::from_str(&body)
                    .with_context(|| format!("parsing order book {}", path.display()))?;
                Ok(Some(ob))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
}

/// In-memory feed. Sources marked failing report `ok == false`.
#[derive(Debug, Default)]
pub struct StaticFeed {
    events: Mutex<HashMap<EventSource, Vec<RawEvent>>>,
    failing: Mutex<HashMap<EventSource, String>>,
    series: Mutex<HashMap<i64, PriceSeries>>,
    books: Mutex<HashMap<i64, OrderBookSnapshot>>,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(self, source: EventSource, events: Vec<RawEvent>) -> Self {
        self.set_events(source, events);
        self
    }

    pub fn with_series(self, subject_id: i64, series: PriceSeries) -> Self {
        self.set_series(subject_id, series);
        self
    }

    pub fn with_order_book(self, subject_id: i64, book: OrderBookSnapshot) -> Self {
        lock(&self.books).insert(subject_id, book);
        self
    }

    pub fn set_events(&self, source: EventSource, events: Vec<RawEvent>) {
        lock(&self.events).insert(source, events);
    }

    pub fn set_series(&self, subject_id: i64, series: PriceSeries) {
        lock(&self.series).insert(subject_id, series);
    }

    pub fn fail_source(&self, source: EventSource, error: impl Into<String>) {
        lock(&self.failing).insert(source, error.into());
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[async_trait]
impl EventFeed for StaticFeed {
    async fn fetch_raw_events(&self, source: EventSource, limit: usize) -> FetchedEvents {
        if let Some(err) = lock(&self.failing).get(&source) {
            return FetchedEvents::failed(source, err.clone());
        }
        let mut events = lock(&self.events).get(&source).cloned().unwrap_or_default();
        events.truncate(limit);
        FetchedEvents {
            status: SourceStatus::ok(source, events.len()),
            events,
        }
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[async_trait]
impl PriceFeed for StaticFeed {
    async fn fetch_price_series(&self, subject_id: i64, _days: u32) -> Result<PricedSeries> {
        let series = lock(&self.series)
            .get(&subject_id)
            .cloned()
            .ok_or_else(|| anyhow!("no price series for subject {subject_id}"))?;
        Ok(PricedSeries {
            currency: default_currency(),
            series,
        })
    }

    async fn fetch_order_book(&self, subject_id: i64) -> Result<Option<OrderBookSnapshot>> {
        Ok(lock(&self.books).get(&subject_id).copied())
    }
}
