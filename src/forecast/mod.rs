// src/forecast/mod.rs
//! # Forecast Aggregator
//! Blends factor scores into one bounded signal with a risk envelope.
//!
//! ```text
//! raw    = Σ weight_i * score_i                  (missing factor → 0)
//! raw'   = raw * (1 - blend) + semantic * blend  (only with an overlay result)
//! risk   = clamp(vol, spread, liquidity, source conflict [+ overlay conflicts])
//! final  = clamp(raw' * (1 - risk * damping), -1, 1)
//! ```
//! Trend, risk level and recommendation are table lookups on `final`/`risk`.

pub mod decision;
pub mod factors;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::analyze::impact::ImpactRecord;
use crate::forecast::decision::{recommend, Recommendation, RiskCutoffs, RiskLevel, Trend};
use crate::forecast::factors::{MomentumFactor, OrderBookFactor};
use crate::ingest::types::{EventSource, Subject};
use crate::pipeline::PipelineContext;
use crate::semantic::SemanticAggregate;
use crate::series::PriceSeries;

/// Stand-in for a risk term whose input is missing.
const UNKNOWN_RISK_TERM: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastWeights {
    pub momentum: f64,
    pub order_book: f64,
    pub patch_notes: f64,
    pub pro_players: f64,
    pub attention: f64,
}

impl Default for ForecastWeights {
    fn default() -> Self {
        Self {
            momentum: 0.36,
            order_book: 0.22,
            patch_notes: 0.18,
            pro_players: 0.16,
            attention: 0.08,
        }
    }
}

impl ForecastWeights {
    pub fn sum(&self) -> f64 {
        self.momentum + self.order_book + self.patch_notes + self.pro_players + self.attention
    }

    fn for_source(&self, source: EventSource) -> f64 {
        match source {
            EventSource::PatchNotes => self.patch_notes,
            EventSource::ProPlayers => self.pro_players,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub volatility: f64,
    pub spread: f64,
    pub low_liquidity: f64,
    pub conflict: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            volatility: 0.35,
            spread: 0.25,
            low_liquidity: 0.2,
            conflict: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastTable {
    pub weights: ForecastWeights,
    pub risk_weights: RiskWeights,
    /// |final| at or above this is a trend.
    pub trend_threshold: f64,
    /// final = raw * (1 - risk * damping)
    pub risk_damping: f64,
    pub risk_levels: RiskCutoffs,
    /// Divisor inside the source-signal tanh.
    pub source_squash: f64,
    pub attention_window_days: i64,
    /// Distinct recent events at which attention density saturates.
    pub attention_full_count: f64,
    /// Spread (percent of mid) at which spread risk saturates.
    pub spread_full_pct: f64,
    pub full_liquidity_listings: u32,
}

impl Default for ForecastTable {
    fn default() -> Self {
        Self {
            weights: ForecastWeights::default(),
            risk_weights: RiskWeights::default(),
            trend_threshold: 0.18,
            risk_damping: 0.3,
            risk_levels: RiskCutoffs::default(),
            source_squash: 4.0,
            attention_window_days: 7,
            attention_full_count: 10.0,
            spread_full_pct: 15.0,
            full_liquidity_listings: 50,
        }
    }
}

impl ForecastTable {
    pub fn validate(&self) -> Result<()> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            bail!("forecast.weights must sum to 1 (got {sum})");
        }
        let w = &self.weights;
        if [w.momentum, w.order_book, w.patch_notes, w.pro_players, w.attention]
            .iter()
            .any(|x| *x < 0.0)
        {
            bail!("forecast.weights must be non-negative");
        }
        if !(0.0..1.0).contains(&self.trend_threshold) || self.trend_threshold == 0.0 {
            bail!("forecast.trend_threshold must lie in (0, 1)");
        }
        if !(0.0..=1.0).contains(&self.risk_damping) {
            bail!("forecast.risk_damping must lie in [0, 1]");
        }
        let c = &self.risk_levels;
        if !(0.0 < c.low && c.low < c.medium && c.medium <= 1.0) {
            bail!("forecast.risk_levels must satisfy 0 < low < medium <= 1");
        }
        if self.attention_window_days <= 0 || self.source_squash <= 0.0 {
            bail!("forecast attention window and source squash must be positive");
        }
        Ok(())
    }
}

/// Pre-normalised factor inputs; `None` means the family had no data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastInputs {
    pub momentum: Option<MomentumFactor>,
    pub order_book: Option<OrderBookFactor>,
    pub patch_notes: Option<f64>,
    pub pro_players: Option<f64>,
    pub attention: Option<f64>,
}

impl ForecastInputs {
    /// Fraction of the four families (momentum, order book, events,
    /// attention) that had data.
    pub fn coverage(&self) -> f64 {
        let families = [
            self.momentum.is_some(),
            self.order_book.is_some(),
            self.patch_notes.is_some() || self.pro_players.is_some(),
            self.attention.is_some(),
        ];
        families.iter().filter(|x| **x).count() as f64 / families.len() as f64
    }

    fn source(&self, source: EventSource) -> Option<f64> {
        match source {
            EventSource::PatchNotes => self.patch_notes,
            EventSource::ProPlayers => self.pro_players,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    pub momentum: Option<f64>,
    pub order_book: Option<f64>,
    pub patch_notes: Option<f64>,
    pub pro_players: Option<f64>,
    pub attention: Option<f64>,
}

/// Computed per request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSnapshot {
    pub subject_id: i64,
    pub generated_at_ms: i64,
    pub factors: FactorScores,
    pub raw_signal: f64,
    pub semantic_signal: Option<f64>,
    pub final_signal: f64,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub trend: Trend,
    /// 0–100
    pub confidence: u8,
    pub coverage: f64,
    pub recommendation: Recommendation,
    pub recommendation_text: String,
    pub warnings: Vec<String>,
}

/// Overlay parameters used by [`aggregate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticBlend<'a> {
    pub aggregate: &'a SemanticAggregate,
    pub weight: f64,
    pub conflict_step: f64,
    pub conflict_cap: f64,
}

fn finite_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        fallback
    }
}

/// Pure aggregation. Always yields `final ∈ [-1, 1]` and `risk ∈ [0, 1]`.
pub fn aggregate(
    subject_id: i64,
    inputs: &ForecastInputs,
    semantic: Option<SemanticBlend<'_>>,
    table: &ForecastTable,
    now_ms: i64,
) -> ForecastSnapshot {
    let w = &table.weights;
    let clamp1 = |v: f64| finite_or(v, 0.0).clamp(-1.0, 1.0);

    let factors = FactorScores {
        momentum: inputs.momentum.map(|m| clamp1(m.score)),
        order_book: inputs.order_book.map(|b| clamp1(b.score)),
        patch_notes: inputs.patch_notes.map(clamp1),
        pro_players: inputs.pro_players.map(clamp1),
        attention: inputs.attention.map(clamp1),
    };

    let mut raw = w.momentum * factors.momentum.unwrap_or(0.0)
        + w.order_book * factors.order_book.unwrap_or(0.0)
        + w.attention * factors.attention.unwrap_or(0.0);
    for source in EventSource::ALL {
        raw += w.for_source(source) * inputs.source(source).map(clamp1).unwrap_or(0.0);
    }
    let raw = clamp1(raw);

    // Risk
    let rw = &table.risk_weights;
    let unit = |v: f64| finite_or(v, UNKNOWN_RISK_TERM).clamp(0.0, 1.0);
    let vol = unit(
        inputs
            .momentum
            .and_then(|m| m.volatility)
            .unwrap_or(UNKNOWN_RISK_TERM),
    );
    let (spread, liquidity) = inputs
        .order_book
        .map(|b| (unit(b.spread_risk), unit(b.low_liquidity)))
        .unwrap_or((UNKNOWN_RISK_TERM, UNKNOWN_RISK_TERM));
    let conflict = match (factors.patch_notes, factors.pro_players) {
        (Some(a), Some(b)) if a * b < 0.0 => ((a - b).abs() / 2.0).min(1.0),
        _ => 0.0,
    };
    let mut risk = rw.volatility * vol
        + rw.spread * spread
        + rw.low_liquidity * liquidity
        + rw.conflict * conflict;

    let mut blended = raw;
    let mut semantic_signal = None;
    if let Some(sem) = semantic {
        let s = clamp1(sem.aggregate.signal);
        let bw = finite_or(sem.weight, 0.0).clamp(0.0, 1.0);
        blended = raw * (1.0 - bw) + s * bw;
        semantic_signal = Some(s);
        risk += (sem.aggregate.conflicts as f64 * sem.conflict_step).min(sem.conflict_cap);
    }
    let risk = unit(risk);

    let final_signal = clamp1(blended * (1.0 - risk * table.risk_damping));
    let trend = Trend::from_signal(final_signal, table.trend_threshold);
    let risk_level = RiskLevel::from_score(risk, &table.risk_levels);
    let recommendation = recommend(trend, risk_level);
    let coverage = inputs.coverage();
    let confidence =
        (100.0 * (0.45 * final_signal.abs() + 0.35 * coverage + 0.2 * (1.0 - risk)).clamp(0.0, 1.0))
            .round() as u8;

    ForecastSnapshot {
        subject_id,
        generated_at_ms: now_ms,
        factors,
        raw_signal: raw,
        semantic_signal,
        final_signal,
        risk_score: risk,
        risk_level,
        trend,
        confidence,
        coverage,
        recommendation,
        recommendation_text: recommendation.text().to_string(),
        warnings: Vec::new(),
    }
}

/// Factor inputs from stored impacts, a price series and an optional book.
pub fn build_inputs(
    impacts: &[ImpactRecord],
    series: &crate::series::PriceSeries,
    book: Option<&crate::ingest::types::OrderBookSnapshot>,
    decay: &crate::analyze::impact::DecayTable,
    table: &ForecastTable,
    now_ms: i64,
) -> ForecastInputs {
    ForecastInputs {
        momentum: factors::momentum(series, now_ms),
        order_book: book.and_then(|b| factors::order_book(b, table)),
        patch_notes: factors::source_signal(
            impacts,
            EventSource::PatchNotes,
            now_ms,
            decay,
            table.source_squash,
        ),
        pro_players: factors::source_signal(
            impacts,
            EventSource::ProPlayers,
            now_ms,
            decay,
            table.source_squash,
        ),
        attention: factors::attention_heat(impacts, now_ms, table),
    }
}

/// Order book, factor inputs, semantic overlay and aggregation over the
/// given impacts and series. Degradations are appended to `warnings`, which
/// end up on the snapshot.
pub(crate) async fn blend_forecast(
    ctx: &PipelineContext,
    subject: &Subject,
    impacts: &[ImpactRecord],
    series: &PriceSeries,
    now_ms: i64,
    mut warnings: Vec<String>,
) -> ForecastSnapshot {
    let cfg = &ctx.config;
    let book = match ctx.prices.fetch_order_book(subject.id).await {
        Ok(b) => b,
        Err(e) => {
            warnings.push(format!("order book unavailable for subject {}: {e:#}", subject.id));
            None
        }
    };
    let inputs = build_inputs(
        impacts,
        series,
        book.as_ref(),
        &cfg.scoring.decay_half_life_days,
        &cfg.forecast,
        now_ms,
    );

    let overlay = crate::semantic::refine(
        ctx.semantic.as_ref(),
        ctx.store.as_ref(),
        impacts,
        &subject.name,
        &cfg.semantic,
    )
    .await;
    let sem_agg = match overlay {
        Ok(agg) => Some(agg),
        Err(reason) => {
            if reason.is_warning() {
                warnings.push(format!("semantic overlay degraded: {reason}"));
            }
            None
        }
    };
    let blend = sem_agg.as_ref().map(|a| SemanticBlend {
        aggregate: a,
        weight: cfg.semantic.blend_weight,
        conflict_step: cfg.semantic.conflict_risk_step,
        conflict_cap: cfg.semantic.conflict_risk_cap,
    });

    let mut snap = aggregate(subject.id, &inputs, blend, &cfg.forecast, now_ms);
    snap.warnings = warnings;
    snap
}

/// On-demand forecast for one subject: stored impacts + fresh market data,
/// optionally refined by the semantic overlay. Overlay failures become
/// warnings on the snapshot.
pub async fn forecast_subject(
    ctx: &PipelineContext,
    subject: &Subject,
    now_ms: i64,
) -> Result<ForecastSnapshot> {
    let cfg = &ctx.config;
    let impacts = crate::store::impacts_for_subject(ctx.store.as_ref(), subject.id)
        .await
        .with_context(|| format!("loading impacts for subject {}", subject.id))?;

    let mut warnings = Vec::new();
    let series = match ctx
        .prices
        .fetch_price_series(subject.id, cfg.pipeline.price_history_days)
        .await
    {
        Ok(s) => s.series,
        Err(e) => {
            warnings.push(format!("price series unavailable: {e:#}"));
            PriceSeries::new()
        }
    };
    let snap = blend_forecast(ctx, subject, &impacts, &series, now_ms, warnings).await;
    tracing::info!(
        target: "forecast",
        subject = subject.id,
        final_signal = snap.final_signal,
        risk = snap.risk_score,
        trend = ?snap.trend,
        confidence = snap.confidence,
        "forecast computed"
    );
    Ok(snap)
}
