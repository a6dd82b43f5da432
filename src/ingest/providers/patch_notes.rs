// src/ingest/providers/patch_notes.rs
use std::collections::BTreeSet;

use anyhow::{Context, Result};
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::types::{EventSource, RawEvent};
use crate::ingest::{content_id, normalize_text};

use super::upstream_id;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "category", default)]
    category: Vec<String>,
}

fn parse_rfc2822_to_ms(ts: &str) -> Option<i64> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as i64)
}

/// Parse a patch-notes RSS document. Items without a title or a parseable
/// `pubDate` are rejected individually; a document that is not RSS at all
/// is an error.
pub fn parse_feed(xml: &str) -> Result<Vec<RawEvent>> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).context("parsing patch notes rss xml")?;

    let mut out = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let title = normalize_text(it.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            tracing::debug!(target: "ingest", "patch note item without title rejected");
            continue;
        }
        let Some(published_at_ms) = it.pub_date.as_deref().and_then(parse_rfc2822_to_ms) else {
            tracing::debug!(
                target: "ingest",
                id = %crate::ingest::anon_hash(&title),
                "patch note item with bad pubDate rejected"
            );
            continue;
        };
        let body = normalize_text(it.description.as_deref().unwrap_or_default());

        let id = match it.guid.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
            Some(guid) => upstream_id(EventSource::PatchNotes, guid),
            None => content_id(EventSource::PatchNotes, published_at_ms, &title, &body),
        };

        let tags: BTreeSet<String> = it
            .category
            .iter()
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        out.push(RawEvent {
            id,
            source: EventSource::PatchNotes,
            published_at_ms,
            title,
            body,
            tags,
        });
    }

    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
