// src/analyze/mod.rs
//! Deterministic analysis: classify events, then score them against a price series.

pub mod classify;
pub mod impact;
pub mod relevance;

pub use crate::analyze::classify::{
    classify, classify_event, Category, Classification, ClassifiedEvent, PlayerEventKind,
    Severity, SeverityTable,
};
pub use crate::analyze::impact::{Direction, ImpactRecord, ImpactScorer, Returns, ScoringTable};
pub use crate::analyze::relevance::RelevanceWeights;

use crate::ingest::types::{RawEvent, Subject};
use crate::series::PriceSeries;

/// Classify and score a batch of events for one subject. Events are
/// independent; output order follows input order.
pub fn score_events(
    scorer: &ImpactScorer,
    severity: &SeverityTable,
    subject: &Subject,
    events: &[RawEvent],
    series: &PriceSeries,
    now_ms: i64,
) -> Vec<ImpactRecord> {
    events
        .iter()
        .map(|ev| scorer.score(subject, &classify_event(ev, severity), series, now_ms))
        .collect()
}
