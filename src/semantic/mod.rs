// src/semantic/mod.rs
//! # Semantic Overlay
//! Optional refinement of deterministic scores by an external text-analysis
//! service.
//!
//! 1. Batch: top-N impacts by |impact_score| (ties: newer first, then id).
//! 2. Send a compact JSON description through a [`client::SemanticClient`].
//! 3. Parse the reply strictly. Judgments for unknown ids and references to
//!    ids outside the batch are dropped; out-of-range numbers reject the
//!    whole reply.
//! 4. Aggregate the non-duplicate judgments into a signal in [-1, 1].
//!
//! Every failure is a [`DegradeReason`]; callers fall back to the
//! deterministic forecast.

pub mod client;

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::analyze::impact::{Direction, ImpactRecord};
use crate::config::SemanticConfig;
use crate::ingest::types::EventSource;
use crate::semantic::client::SemanticClient;
use crate::store::KeyValueStore;

pub use crate::semantic::client::{
    build_client, CachingClient, DisabledClient, DynSemanticClient, MockClient, OpenAiClient,
    StaticClient,
};

const TITLE_CHARS: usize = 200;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "semantic_degraded_total",
            "Semantic overlay calls that fell back to deterministic scores, by reason."
        );
        describe_counter!("semantic_applied_total", "Semantic aggregates used in a forecast.");
    });
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DegradeReason {
    #[error("semantic overlay disabled")]
    Disabled,
    #[error("no scored events to analyze")]
    EmptyBatch,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("semantic call timed out")]
    Timeout,
    #[error("malformed semantic response: {0}")]
    Malformed(String),
    #[error("daily semantic call limit reached")]
    RateLimited,
}

impl DegradeReason {
    pub fn label(&self) -> &'static str {
        match self {
            DegradeReason::Disabled => "disabled",
            DegradeReason::EmptyBatch => "empty_batch",
            DegradeReason::Transport(_) => "transport",
            DegradeReason::Timeout => "timeout",
            DegradeReason::Malformed(_) => "malformed",
            DegradeReason::RateLimited => "rate_limited",
        }
    }

    /// An empty batch is the normal state for a quiet subject.
    pub fn is_warning(&self) -> bool {
        !matches!(self, DegradeReason::EmptyBatch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticBatchItem {
    pub id: String,
    pub provider: EventSource,
    pub published_at_ms: i64,
    pub title: String,
    pub direction: Direction,
    pub impact: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticBatch {
    pub subject: String,
    pub items: Vec<SemanticBatchItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgedDirection {
    Up,
    Down,
    Flat,
}

impl JudgedDirection {
    fn sign(self) -> f64 {
        match self {
            JudgedDirection::Up => 1.0,
            JudgedDirection::Down => -1.0,
            JudgedDirection::Flat => 0.0,
        }
    }
}

/// One validated per-event judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventJudgment {
    pub id: String,
    pub direction: JudgedDirection,
    pub confidence: f64,
    pub relevance: f64,
    pub hype_score: f64,
    pub reliability: f64,
    pub duplicate_of: Option<String>,
    pub conflicts_with: Vec<String>,
    pub evidence: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireReply {
    events: Vec<WireJudgment>,
}

#[derive(Debug, Deserialize)]
struct WireJudgment {
    id: String,
    direction: JudgedDirection,
    confidence: f64,
    #[serde(default = "one")]
    relevance: f64,
    #[serde(default, alias = "hypeScore")]
    hype_score: f64,
    #[serde(default = "one")]
    reliability: f64,
    #[serde(default, alias = "duplicateOf")]
    duplicate_of: Option<String>,
    #[serde(default, alias = "conflictsWith")]
    conflicts_with: Vec<String>,
    #[serde(default)]
    evidence: String,
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticAggregate {
    /// Weighted direction of non-duplicate judgments, in [-1, 1].
    pub signal: f64,
    pub used: usize,
    pub duplicates_excluded: usize,
    /// Distinct unordered conflict pairs inside the batch.
    pub conflicts: usize,
    pub judgments: Vec<EventJudgment>,
}

/// Top `n` scored impacts by |impact_score|; records without a score are
/// never sent.
pub fn select_batch(impacts: &[ImpactRecord], n: usize) -> Vec<&ImpactRecord> {
    let mut scored: Vec<&ImpactRecord> = impacts
        .iter()
        .filter(|r| r.impact_score.is_some_and(f64::is_finite))
        .collect();
    scored.sort_by(|a, b| {
        let ia = a.impact_score.map_or(0.0, f64::abs);
        let ib = b.impact_score.map_or(0.0, f64::abs);
        ib.partial_cmp(&ia)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.event_time_ms.cmp(&a.event_time_ms))
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
    // One entry per event id; the same event may be scored for several providers.
    let mut seen = HashSet::new();
    scored.retain(|r| seen.insert(r.event_id.clone()));
    scored.truncate(n);
    scored
}

/// Strict parse of a reply against the ids that were sent.
pub fn parse_reply(raw: &str, batch_ids: &HashSet<String>) -> Result<Vec<EventJudgment>, DegradeReason> {
    let reply: WireReply =
        serde_json::from_str(raw.trim()).map_err(|e| DegradeReason::Malformed(e.to_string()))?;

    let mut out = Vec::with_capacity(reply.events.len());
    let mut seen = HashSet::new();
    for w in reply.events {
        for (name, v) in [
            ("confidence", w.confidence),
            ("relevance", w.relevance),
            ("hype_score", w.hype_score),
            ("reliability", w.reliability),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(DegradeReason::Malformed(format!(
                    "{name}={v} out of [0, 1] for `{}`",
                    w.id
                )));
            }
        }
        if !batch_ids.contains(&w.id) || !seen.insert(w.id.clone()) {
            continue;
        }
        let duplicate_of = w
            .duplicate_of
            .filter(|d| *d != w.id && batch_ids.contains(d));
        let conflicts_with: Vec<String> = w
            .conflicts_with
            .into_iter()
            .filter(|c| *c != w.id && batch_ids.contains(c))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        out.push(EventJudgment {
            id: w.id,
            direction: w.direction,
            confidence: w.confidence,
            relevance: w.relevance,
            hype_score: w.hype_score,
            reliability: w.reliability,
            duplicate_of,
            conflicts_with,
            evidence: w.evidence,
        });
    }
    Ok(out)
}

/// Judgments marked as duplicates are excluded. `Malformed` when nothing
/// usable remains.
pub fn aggregate_judgments(judgments: Vec<EventJudgment>) -> Result<SemanticAggregate, DegradeReason> {
    let mut num = 0.0;
    let mut den = 0.0;
    let mut used = 0usize;
    let mut duplicates = 0usize;
    let mut pairs: HashSet<(String, String)> = HashSet::new();

    for j in &judgments {
        for c in &j.conflicts_with {
            let pair = if j.id < *c {
                (j.id.clone(), c.clone())
            } else {
                (c.clone(), j.id.clone())
            };
            pairs.insert(pair);
        }
        if j.duplicate_of.is_some() {
            duplicates += 1;
            continue;
        }
        let w = j.relevance * j.reliability * (1.0 - 0.5 * j.hype_score);
        if w <= 0.0 {
            continue;
        }
        num += j.direction.sign() * j.confidence * w;
        den += w;
        used += 1;
    }

    if den <= 0.0 {
        return Err(DegradeReason::Malformed("no usable judgments".into()));
    }
    Ok(SemanticAggregate {
        signal: (num / den).clamp(-1.0, 1.0),
        used,
        duplicates_excluded: duplicates,
        conflicts: pairs.len(),
        judgments,
    })
}

fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Full overlay round trip. Never fails the caller: the error side is the
/// reason to record while falling back.
pub async fn refine(
    client: &dyn SemanticClient,
    store: &dyn KeyValueStore,
    impacts: &[ImpactRecord],
    subject_name: &str,
    cfg: &SemanticConfig,
) -> Result<SemanticAggregate, DegradeReason> {
    ensure_metrics_described();
    let out = refine_inner(client, store, impacts, subject_name, cfg).await;
    match &out {
        Ok(agg) => {
            counter!("semantic_applied_total").increment(1);
            tracing::debug!(
                target: "semantic",
                client = client.name(),
                used = agg.used,
                duplicates = agg.duplicates_excluded,
                conflicts = agg.conflicts,
                signal = agg.signal,
                "semantic aggregate ready"
            );
        }
        Err(reason) => {
            counter!("semantic_degraded_total", "reason" => reason.label()).increment(1);
            if reason.is_warning() {
                tracing::warn!(target: "semantic", client = client.name(), %reason, "semantic overlay degraded");
            }
        }
    }
    out
}

async fn refine_inner(
    client: &dyn SemanticClient,
    store: &dyn KeyValueStore,
    impacts: &[ImpactRecord],
    subject_name: &str,
    cfg: &SemanticConfig,
) -> Result<SemanticAggregate, DegradeReason> {
    let selected = select_batch(impacts, cfg.batch_size);
    if selected.is_empty() {
        return Err(DegradeReason::EmptyBatch);
    }

    let mut items = Vec::with_capacity(selected.len());
    for r in selected {
        // A missing title only weakens the prompt.
        let title = crate::store::get_event(store, r.provider, &r.event_id)
            .await
            .ok()
            .flatten()
            .map(|e| truncate_chars(&e.title, TITLE_CHARS))
            .unwrap_or_default();
        items.push(SemanticBatchItem {
            id: r.event_id.clone(),
            provider: r.provider,
            published_at_ms: r.event_time_ms,
            title,
            direction: r.direction,
            impact: r.impact_score.unwrap_or(0.0),
            relevance: r.relevance_score,
        });
    }
    let batch = SemanticBatch {
        subject: subject_name.to_string(),
        items,
    };
    let ids: HashSet<String> = batch.items.iter().map(|i| i.id.clone()).collect();

    let timeout = Duration::from_secs(cfg.timeout_secs.max(1));
    let raw = tokio::time::timeout(timeout, client.analyze(&batch))
        .await
        .map_err(|_| DegradeReason::Timeout)??;

    let judgments = parse_reply(&raw, &ids)?;
    aggregate_judgments(judgments)
}
