//! # Impact Scorer
//! Event + classification + price series → [`ImpactRecord`].
//!
//! 1. Baseline: latest sample at or before publication (first sample if it
//!    follows within `baseline_forward_gap_hours`).
//! 2. Returns at +1h / +24h / +72h from the nearest sample within each
//!    horizon's gap tolerance, in percent of the baseline.
//! 3. Direction from the first available of h24, h72, h1.
//! 4. `impact = severity_weight * (1 + min(max|ret|, cap) / 10) * exp(-age_days / half_life)`.
//! 5. Relevance for pro-player events only.
//!
//! Pure: the only clock is the `now_ms` argument.

use serde::{Deserialize, Serialize};

use crate::analyze::classify::{ClassifiedEvent, Severity};
use crate::analyze::relevance::{score_relevance, RelevanceWeights};
use crate::ingest::types::{EventSource, Subject};
use crate::series::{PriceSeries, DAY_MS, HOUR_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Flat,
    Insufficient,
}

impl Direction {
    /// +1 / -1 / 0; `None` when there was no data.
    pub fn sign(&self) -> Option<f64> {
        match self {
            Direction::Up => Some(1.0),
            Direction::Down => Some(-1.0),
            Direction::Flat => Some(0.0),
            Direction::Insufficient => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Returns {
    pub h1: Option<f64>,
    pub h24: Option<f64>,
    pub h72: Option<f64>,
}

impl Returns {
    pub fn max_abs(&self) -> Option<f64> {
        [self.h1, self.h24, self.h72]
            .into_iter()
            .flatten()
            .map(f64::abs)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
    }
}

/// Persisted per (provider, subject, event). Upserts overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactRecord {
    pub provider: EventSource,
    pub subject_id: i64,
    pub event_id: String,
    pub event_time_ms: i64,
    pub baseline_price: Option<f64>,
    pub returns: Returns,
    pub direction: Direction,
    pub impact_score: Option<f64>,
    pub relevance_score: Option<f64>,
}

impl ImpactRecord {
    pub fn key(&self) -> String {
        crate::store::impact_key(self.provider, self.subject_id, &self.event_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            high: 3.0,
            medium: 2.0,
            low: 1.0,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, s: Severity) -> f64 {
        match s {
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayTable {
    pub patch_notes: f64,
    pub pro_players: f64,
}

impl Default for DecayTable {
    fn default() -> Self {
        Self {
            patch_notes: 35.0,
            pro_players: 45.0,
        }
    }
}

impl DecayTable {
    pub fn half_life_days(&self, source: EventSource) -> f64 {
        match source {
            EventSource::PatchNotes => self.patch_notes,
            EventSource::ProPlayers => self.pro_players,
        }
    }
}

/// Gap tolerance per horizon, in hours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonGaps {
    pub h1: i64,
    pub h24: i64,
    pub h72: i64,
}

impl Default for HorizonGaps {
    fn default() -> Self {
        Self {
            h1: 8,
            h24: 36,
            h72: 96,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringTable {
    pub severity_weights: SeverityWeights,
    pub decay_half_life_days: DecayTable,
    pub horizon_gap_hours: HorizonGaps,
    pub baseline_forward_gap_hours: i64,
    /// |return| below this (percent) is `flat`.
    pub flat_threshold_pct: f64,
    pub return_cap_pct: f64,
}

impl Default for ScoringTable {
    fn default() -> Self {
        Self {
            severity_weights: SeverityWeights::default(),
            decay_half_life_days: DecayTable::default(),
            horizon_gap_hours: HorizonGaps::default(),
            baseline_forward_gap_hours: 24,
            flat_threshold_pct: 0.8,
            return_cap_pct: 30.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImpactScorer {
    pub table: ScoringTable,
    pub relevance: RelevanceWeights,
}

impl ImpactScorer {
    pub fn new(table: ScoringTable, relevance: RelevanceWeights) -> Self {
        Self { table, relevance }
    }

    pub fn score(
        &self,
        subject: &Subject,
        classified: &ClassifiedEvent,
        series: &PriceSeries,
        now_ms: i64,
    ) -> ImpactRecord {
        let event = &classified.event;
        let t = &self.table;
        let ts = event.published_at_ms;

        let baseline = series.nearest_as_of(ts, t.baseline_forward_gap_hours * HOUR_MS);

        let returns = match baseline {
            Some(base) => {
                let ret_at = |h_hours: i64, gap_hours: i64| {
                    ts.checked_add(h_hours * HOUR_MS)
                        .and_then(|at| series.nearest(at, gap_hours * HOUR_MS))
                        .map(|p| (p.price - base.price) / base.price * 100.0)
                };
                Returns {
                    h1: ret_at(1, t.horizon_gap_hours.h1),
                    h24: ret_at(24, t.horizon_gap_hours.h24),
                    h72: ret_at(72, t.horizon_gap_hours.h72),
                }
            }
            None => Returns::default(),
        };

        let direction = direction_of(&returns, t.flat_threshold_pct);

        let impact_score = returns.max_abs().map(|max_abs| {
            let sev = t.severity_weights.weight(classified.classification.severity);
            let age_days = now_ms.saturating_sub(ts).max(0) as f64 / DAY_MS as f64;
            let half_life = t.decay_half_life_days.half_life_days(event.source).max(1e-9);
            sev * (1.0 + max_abs.min(t.return_cap_pct) / 10.0) * (-age_days / half_life).exp()
        });

        let relevance_score = match event.source {
            EventSource::ProPlayers => Some(score_relevance(
                subject,
                event,
                &classified.classification,
                &self.relevance,
            )),
            EventSource::PatchNotes => None,
        };

        ImpactRecord {
            provider: event.source,
            subject_id: subject.id,
            event_id: event.id.clone(),
            event_time_ms: ts,
            baseline_price: baseline.map(|b| b.price),
            returns,
            direction,
            impact_score,
            relevance_score,
        }
    }
}

/// First non-null of h24, h72, h1 decides.
pub fn direction_of(r: &Returns, flat_threshold_pct: f64) -> Direction {
    match r.h24.or(r.h72).or(r.h1) {
        None => Direction::Insufficient,
        Some(v) if v.abs() < flat_threshold_pct => Direction::Flat,
        Some(v) if v > 0.0 => Direction::Up,
        Some(_) => Direction::Down,
    }
}
