// src/ingest/providers/mod.rs
//! Provider payloads at the ingestion boundary.
//!
//! Each upstream format is one variant of [`ProviderPayload`]; it is turned
//! into typed [`RawEvent`]s right here and never carried further as loose JSON.

pub mod fixture;
pub mod patch_notes;
pub mod player_news;

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::ingest::types::{EventSource, RawEvent};

#[derive(Debug, Clone)]
pub enum ProviderPayload {
    /// Patch-notes RSS document.
    PatchNotesRss(String),
    /// Pro-player news JSON document.
    PlayerNewsJson(String),
}

impl ProviderPayload {
    pub fn source(&self) -> EventSource {
        match self {
            ProviderPayload::PatchNotesRss(_) => EventSource::PatchNotes,
            ProviderPayload::PlayerNewsJson(_) => EventSource::ProPlayers,
        }
    }

    pub fn into_events(self) -> Result<Vec<RawEvent>> {
        match self {
            ProviderPayload::PatchNotesRss(xml) => patch_notes::parse_feed(&xml),
            ProviderPayload::PlayerNewsJson(json) => player_news::parse_feed(&json),
        }
    }
}

/// Stable id from an upstream identifier (guid, article id, ...).
pub(crate) fn upstream_id(source: EventSource, upstream: &str) -> String {
    let digest = Sha256::digest(upstream.trim().as_bytes());
    let mut out = format!("{}-u", &source.as_str()[..2]);
    for b in digest.iter().take(12) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
