// src/forecast/factors.rs
//! Factor scores fed into the aggregator. Each returns `None` when its
//! inputs carry no usable data, which lowers forecast coverage.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::analyze::impact::{DecayTable, Direction, ImpactRecord};
use crate::forecast::ForecastTable;
use crate::ingest::types::{EventSource, OrderBookSnapshot};
use crate::series::{PriceSeries, DAY_MS, HOUR_MS};

/// (lookback days, weight, tanh scale in percent, lookup tolerance hours)
const MOMENTUM_LEGS: [(i64, f64, f64, i64); 3] =
    [(1, 0.5, 5.0, 12), (7, 0.3, 10.0, 48), (30, 0.2, 20.0, 120)];

/// Daily stdev (percent) at which the volatility penalty saturates.
const VOLATILITY_FULL_PCT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MomentumFactor {
    pub score: f64,
    pub r1d: Option<f64>,
    pub r7d: Option<f64>,
    pub r30d: Option<f64>,
    /// Stdev of step returns over the last 30 days, normalised to [0, 1].
    pub volatility: Option<f64>,
}

/// Trailing-return momentum in [-1, 1], damped by volatility.
pub fn momentum(series: &PriceSeries, now_ms: i64) -> Option<MomentumFactor> {
    let latest = series.nearest_as_of(now_ms, 0)?;

    let mut legs = [None; 3];
    let mut acc = 0.0;
    let mut weight = 0.0;
    for (i, (days, w, scale, gap_h)) in MOMENTUM_LEGS.into_iter().enumerate() {
        let past = series
            .nearest(latest.timestamp_ms.saturating_sub(days * DAY_MS), gap_h * HOUR_MS)
            .filter(|p| p.timestamp_ms < latest.timestamp_ms);
        if let Some(p) = past {
            let r = (latest.price - p.price) / p.price * 100.0;
            legs[i] = Some(r);
            acc += w * (r / scale).tanh();
            weight += w;
        }
    }
    if weight <= 0.0 {
        return None;
    }

    let volatility = volatility(series, latest.timestamp_ms);
    let penalty = 1.0 - 0.5 * volatility.unwrap_or(0.0);
    Some(MomentumFactor {
        score: (acc / weight * penalty).clamp(-1.0, 1.0),
        r1d: legs[0],
        r7d: legs[1],
        r30d: legs[2],
        volatility,
    })
}

fn volatility(series: &PriceSeries, end_ms: i64) -> Option<f64> {
    let window = series.window(end_ms.saturating_sub(30 * DAY_MS), end_ms);
    let changes: Vec<f64> = window
        .windows(2)
        .map(|w| (w[1].price - w[0].price) / w[0].price * 100.0)
        .collect();
    if changes.len() < 2 {
        return None;
    }
    let n = changes.len() as f64;
    let mean = changes.iter().sum::<f64>() / n;
    let var = changes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((var.sqrt() / VOLATILITY_FULL_PCT).min(1.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookFactor {
    /// Volume imbalance toward bids, damped by spread; in [-1, 1].
    pub score: f64,
    pub spread_pct: f64,
    /// Spread normalised to [0, 1] for risk.
    pub spread_risk: f64,
    /// 1 with no listings, 0 at or above the configured depth.
    pub low_liquidity: f64,
}

pub fn order_book(book: &OrderBookSnapshot, table: &ForecastTable) -> Option<OrderBookFactor> {
    let valid = book.best_bid.is_finite()
        && book.best_ask.is_finite()
        && book.best_bid > 0.0
        && book.best_ask >= book.best_bid;
    if !valid {
        return None;
    }
    let vol = book.bid_volume.max(0.0) + book.ask_volume.max(0.0);
    let imbalance = if vol > 0.0 {
        (book.bid_volume.max(0.0) - book.ask_volume.max(0.0)) / vol
    } else {
        0.0
    };
    let mid = (book.best_bid + book.best_ask) / 2.0;
    let spread_pct = (book.best_ask - book.best_bid) / mid * 100.0;
    let spread_risk = (spread_pct / table.spread_full_pct.max(1e-9)).min(1.0);
    let depth = f64::from(book.listings) / f64::from(table.full_liquidity_listings.max(1));
    Some(OrderBookFactor {
        score: (imbalance * (1.0 - 0.5 * spread_risk)).clamp(-1.0, 1.0),
        spread_pct,
        spread_risk,
        low_liquidity: 1.0 - depth.min(1.0),
    })
}

/// Age-decayed, relevance- and direction-weighted mean impact of one
/// source's records, squashed into [-1, 1].
pub fn source_signal(
    impacts: &[ImpactRecord],
    source: EventSource,
    now_ms: i64,
    decay: &DecayTable,
    squash: f64,
) -> Option<f64> {
    let half_life = decay.half_life_days(source).max(1e-9);
    let mut num = 0.0;
    let mut den = 0.0;
    for r in impacts.iter().filter(|r| r.provider == source) {
        let (Some(sign), Some(impact)) = (r.direction.sign(), r.impact_score) else {
            continue;
        };
        let age_days = now_ms.saturating_sub(r.event_time_ms).max(0) as f64 / DAY_MS as f64;
        let w = (-age_days / half_life).exp() * r.relevance_score.unwrap_or(1.0);
        num += sign * impact * w;
        den += w;
    }
    if den <= 0.0 {
        return None;
    }
    Some((num / den / squash.max(1e-9)).tanh())
}

/// Recent event density times directional bias, in [-1, 1]. `None` when no
/// event fell inside the window.
pub fn attention_heat(impacts: &[ImpactRecord], now_ms: i64, table: &ForecastTable) -> Option<f64> {
    let from = now_ms.saturating_sub(table.attention_window_days.saturating_mul(DAY_MS));
    let recent: Vec<&ImpactRecord> = impacts
        .iter()
        .filter(|r| r.event_time_ms >= from && r.event_time_ms <= now_ms)
        .collect();
    let distinct: HashSet<&str> = recent.iter().map(|r| r.event_id.as_str()).collect();
    if distinct.is_empty() {
        return None;
    }
    let density = (distinct.len() as f64 / table.attention_full_count.max(1.0)).min(1.0);
    let ups = recent.iter().filter(|r| r.direction == Direction::Up).count() as f64;
    let downs = recent.iter().filter(|r| r.direction == Direction::Down).count() as f64;
    let bias = if ups + downs > 0.0 {
        (ups - downs) / (ups + downs)
    } else {
        0.0
    };
    Some(density * bias)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::impact::Returns;
    use crate::series::PricePoint;

    const NOW: i64 = 1_700_000_000_000;

    fn rec(source: EventSource, id: &str, age_days: i64, dir: Direction, impact: f64) -> ImpactRecord {
        ImpactRecord {
            provider: source,
            subject_id: 1,
            event_id: id.into(),
            event_time_ms: NOW - age_days * DAY_MS,
            baseline_price: Some(10.0),
            returns: Returns::default(),
            direction: dir,
            impact_score: Some(impact),
            relevance_score: None,
        }
    }

    #[test]
    fn rising_series_has_positive_momentum() {
        let s = PriceSeries::from_points(
            (0..40).map(|d| PricePoint::new(NOW - (39 - d) * DAY_MS, 10.0 + d as f64 * 0.1)),
        );
        let m = momentum(&s, NOW).unwrap();
        assert!(m.score > 0.0 && m.score <= 1.0);
        assert!(m.r1d.unwrap() > 0.0 && m.r30d.unwrap() > m.r1d.unwrap());
        assert!(m.volatility.unwrap() < 0.1);
    }

    #[test]
    fn single_sample_has_no_momentum() {
        let s = PriceSeries::from_points([PricePoint::new(NOW, 10.0)]);
        assert!(momentum(&s, NOW).is_none());
        assert!(momentum(&PriceSeries::new(), NOW).is_none());
    }

    #[test]
    fn order_book_imbalance_and_liquidity() {
        let t = ForecastTable::default();
        let book = OrderBookSnapshot {
            best_bid: 9.9,
            best_ask: 10.1,
            bid_volume: 300.0,
            ask_volume: 100.0,
            listings: 0,
        };
        let f = order_book(&book, &t).unwrap();
        assert!(f.score > 0.0);
        assert!((f.spread_pct - 2.0).abs() < 1e-9);
        assert_eq!(f.low_liquidity, 1.0);

        let crossed = OrderBookSnapshot {
            best_ask: 9.0,
            ..book
        };
        assert!(order_book(&crossed, &t).is_none());
    }

    #[test]
    fn source_signal_ignores_other_sources_and_insufficient() {
        let d = DecayTable::default();
        let impacts = vec![
            rec(EventSource::PatchNotes, "a", 1, Direction::Up, 5.0),
            rec(EventSource::PatchNotes, "b", 1, Direction::Insufficient, 9.0),
            rec(EventSource::ProPlayers, "c", 1, Direction::Down, 9.0),
        ];
        let s = source_signal(&impacts, EventSource::PatchNotes, NOW, &d, 4.0).unwrap();
        assert!((s - (5.0f64 / 4.0).tanh()).abs() < 1e-9);
        assert!(source_signal(&[], EventSource::ProPlayers, NOW, &d, 4.0).is_none());
    }

    #[test]
    fn attention_needs_recent_events() {
        let t = ForecastTable::default();
        let old = vec![rec(EventSource::PatchNotes, "a", 30, Direction::Up, 1.0)];
        assert!(attention_heat(&old, NOW, &t).is_none());

        let fresh = vec![
            rec(EventSource::PatchNotes, "a", 1, Direction::Up, 1.0),
            rec(EventSource::ProPlayers, "b", 2, Direction::Up, 1.0),
            rec(EventSource::ProPlayers, "c", 2, Direction::Down, 1.0),
        ];
        let h = attention_heat(&fresh, NOW, &t).unwrap();
        let expected = (3.0 / t.attention_full_count).min(1.0) * (1.0 / 3.0);
        assert!((h - expected).abs() < 1e-9);
    }
}
