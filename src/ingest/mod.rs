// src/ingest/mod.rs
pub mod health;
pub mod providers;
pub mod types;

use crate::ingest::health::SourceHealth;
use crate::ingest::types::{EventFeed, EventSource, FetchedEvents, RawEvent};
use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Body length cap after normalization (chars).
pub const MAX_TEXT_CHARS: usize = 4000;

/// One-time metrics registration (so series show up in the exporter).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_events_total", "Total events returned by feeds.");
        describe_counter!(
            "ingest_dedup_total",
            "Events dropped because an identical title was already seen in the fetch."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Feed fetches that reported ok=false."
        );
        describe_histogram!("ingest_parse_ms", "Payload parse time in milliseconds.");
    });
}

/// Normalize text: decode entities, strip tags, unify quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Line breaks from block tags, then strip remaining tags
    static RE_BREAKS: OnceCell<regex::Regex> = OnceCell::new();
    let re_breaks =
        RE_BREAKS.get_or_init(|| regex::Regex::new(r"(?i)<\s*(br|/p|/li|/h\d)\s*/?>").unwrap());
    out = re_breaks.replace_all(&out, " ").to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize typographic quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }
    out
}

/// Content-derived id for events whose upstream has no stable identifier.
/// Same source, timestamp, title and body always hash to the same id.
pub fn content_id(source: EventSource, published_at_ms: i64, title: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(published_at_ms.to_be_bytes());
    hasher.update([0u8]);
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(2 + 32);
    out.push_str(&source.as_str()[..2]);
    out.push('-');
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Short anonymised id for logging event text without logging the text.
pub fn anon_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Drop events whose id, or normalized title within the same source, was
/// already seen. Returns the kept events and the number dropped.
pub fn dedup_events(events: Vec<RawEvent>) -> (Vec<RawEvent>, usize) {
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seen_titles: HashSet<(EventSource, String)> = HashSet::new();
    let mut keep = Vec::with_capacity(events.len());
    let mut dropped = 0usize;
    for ev in events {
        let title_key = (ev.source, ev.title.to_lowercase());
        if !seen_ids.insert(ev.id.clone()) || !seen_titles.insert(title_key) {
            dropped += 1;
            continue;
        }
        keep.push(ev);
    }
    (keep, dropped)
}

/// Fetch one source through the feed, record the status in `health`, and
/// deduplicate. Never fails; a failed source yields an empty list.
pub async fn fetch_source(
    feed: &dyn EventFeed,
    source: EventSource,
    limit: usize,
    health: &SourceHealth,
) -> FetchedEvents {
    ensure_metrics_described();

    let mut fetched = feed.fetch_raw_events(source, limit).await;
    if !fetched.status.ok {
        fetched.events.clear();
        counter!("ingest_source_errors_total", "source" => source.as_str()).increment(1);
        tracing::warn!(
            target: "ingest",
            feed = feed.name(),
            %source,
            error = fetched.status.error.as_deref().unwrap_or("unknown"),
            "source fetch failed"
        );
    } else {
        let (kept, dropped) = dedup_events(std::mem::take(&mut fetched.events));
        counter!("ingest_events_total").increment(kept.len() as u64);
        counter!("ingest_dedup_total").increment(dropped as u64);
        fetched.events = kept;
        fetched.events.truncate(limit);
        fetched.status.item_count = fetched.events.len();
        tracing::debug!(
            target: "ingest",
            feed = feed.name(),
            %source,
            kept = fetched.status.item_count,
            dropped,
            "source fetched"
        );
    }

    health.record(&fetched.status);
    fetched
}
