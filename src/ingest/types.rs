// src/ingest/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::series::PricedSeries;

/// Upstream feed an event came from. Also the "provider" half of a job key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Official game-balance patch notes.
    PatchNotes,
    /// Professional-player roster / retirement news.
    ProPlayers,
}

impl EventSource {
    pub const ALL: [EventSource; 2] = [EventSource::PatchNotes, EventSource::ProPlayers];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::PatchNotes => "patch_notes",
            EventSource::ProPlayers => "pro_players",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patch_notes" | "patch-notes" | "patches" => Ok(EventSource::PatchNotes),
            "pro_players" | "pro-players" | "players" => Ok(EventSource::ProPlayers),
            other => anyhow::bail!("unknown event source `{other}`"),
        }
    }
}

/// An ingested event. Immutable once built; `id` is stable across re-ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub source: EventSource,
    pub published_at_ms: i64,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl RawEvent {
    /// Title and body joined for keyword matching.
    pub fn text(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}. {}", self.title, self.body)
        }
    }
}

/// Outcome of one source fetch. A failed fetch has `ok == false` and no events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source: EventSource,
    pub ok: bool,
    pub item_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceStatus {
    pub fn ok(source: EventSource, item_count: usize) -> Self {
        Self {
            source,
            ok: true,
            item_count,
            error: None,
        }
    }

    pub fn failed(source: EventSource, error: impl Into<String>) -> Self {
        Self {
            source,
            ok: false,
            item_count: 0,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedEvents {
    pub events: Vec<RawEvent>,
    pub status: SourceStatus,
}

impl FetchedEvents {
    pub fn failed(source: EventSource, error: impl Into<String>) -> Self {
        Self {
            events: Vec::new(),
            status: SourceStatus::failed(source, error),
        }
    }
}

/// Top of book plus depth for one subject.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
    /// Number of open sell listings.
    pub listings: u32,
}

/// A tracked tradable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub weapon: Option<String>,
    #[serde(default)]
    pub skin: Option<String>,
}

/// Event collaborator. Never fails: errors surface through `status`.
#[async_trait::async_trait]
pub trait EventFeed: Send + Sync {
    async fn fetch_raw_events(&self, source: EventSource, limit: usize) -> FetchedEvents;
    fn name(&self) -> &'static str;
}

/// Price/market collaborator.
#[async_trait::async_trait]
pub trait PriceFeed: Send + Sync {
    /// Already sorted and deduplicated series for the last `days` days.
    async fn fetch_price_series(&self, subject_id: i64, days: u32) -> Result<PricedSeries>;

    async fn fetch_order_book(&self, _subject_id: i64) -> Result<Option<OrderBookSnapshot>> {
        Ok(None)
    }
}
