// src/ingest/providers/player_news.rs
use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::histogram;
use serde::Deserialize;

use crate::ingest::types::{EventSource, RawEvent};
use crate::ingest::{content_id, normalize_text};

use super::upstream_id;

#[derive(Debug, Deserialize)]
struct Feed {
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    id: Option<IdField>,
    #[serde(default)]
    player: Option<String>,
    #[serde(default)]
    team: Option<String>,
    headline: String,
    #[serde(default)]
    summary: Option<String>,
    published_at: Timestamp,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdField {
    Num(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    EpochMs(i64),
    Rfc3339(String),
}

impl Timestamp {
    fn to_ms(&self) -> Option<i64> {
        match self {
            Timestamp::EpochMs(ms) => DateTime::<Utc>::from_timestamp_millis(*ms).map(|_| *ms),
            Timestamp::Rfc3339(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc).timestamp_millis()),
        }
    }
}

/// Parse a pro-player news document: `{"items": [...]}`.
///
/// Per item, `headline` and `published_at` are required; items failing
/// validation are rejected whole and the rest of the document is kept.
pub fn parse_feed(json: &str) -> Result<Vec<RawEvent>> {
    let t0 = std::time::Instant::now();
    let feed: Feed = serde_json::from_str(json).context("parsing player news json")?;

    let mut out = Vec::with_capacity(feed.items.len());
    for (idx, value) in feed.items.into_iter().enumerate() {
        let it: Item = match serde_json::from_value(value) {
            Ok(it) => it,
            Err(e) => {
                tracing::debug!(target: "ingest", idx, error = %e, "malformed player news item rejected");
                continue;
            }
        };
        let title = normalize_text(&it.headline);
        if title.is_empty() {
            tracing::debug!(target: "ingest", "player news item without headline rejected");
            continue;
        }
        let Some(published_at_ms) = it.published_at.to_ms() else {
            tracing::debug!(
                target: "ingest",
                id = %crate::ingest::anon_hash(&title),
                "player news item with bad published_at rejected"
            );
            continue;
        };
        let body = normalize_text(it.summary.as_deref().unwrap_or_default());

        let id = match &it.id {
            Some(IdField::Num(n)) => upstream_id(EventSource::ProPlayers, &n.to_string()),
            Some(IdField::Text(s)) if !s.trim().is_empty() => {
                upstream_id(EventSource::ProPlayers, s)
            }
            _ => content_id(EventSource::ProPlayers, published_at_ms, &title, &body),
        };

        let mut tags: BTreeSet<String> = it
            .tags
            .iter()
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if let Some(p) = it.player.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            tags.insert(format!("player:{}", p.to_ascii_lowercase()));
        }
        if let Some(t) = it.team.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            tags.insert(format!("team:{}", t.to_ascii_lowercase()));
        }
        if let Some(k) = it.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            tags.insert(format!("type:{}", k.to_ascii_lowercase()));
        }

        out.push(RawEvent {
            id,
            source: EventSource::ProPlayers,
            published_at_ms,
            title,
            body,
            tags,
        });
    }

    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}
