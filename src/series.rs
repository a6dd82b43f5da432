//! # Price Series
//! Ordered, deduplicated `(timestamp, price)` samples for one subject, with
//! "as-of" and nearest-neighbour lookup.
//!
//! Invariants: sorted ascending by `timestamp_ms`, no duplicate timestamps
//! (last write wins on ingest), every price is finite and `> 0`.
//! Lookups use binary search on the sorted vector.

use serde::{Deserialize, Serialize};

pub const HOUR_MS: i64 = 3_600_000;
pub const DAY_MS: i64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp_ms: i64,
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp_ms: i64, price: f64) -> Self {
        Self {
            timestamp_ms,
            price,
        }
    }

    fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from unsorted samples. Invalid prices are dropped; for duplicate
    /// timestamps the sample that came later in the input wins.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = PricePoint>,
    {
        let mut tagged: Vec<(usize, PricePoint)> = points
            .into_iter()
            .filter(PricePoint::is_valid)
            .enumerate()
            .collect();
        // Stable by (timestamp, arrival) so the last arrival ends up last in each run.
        tagged.sort_by_key(|(i, p)| (p.timestamp_ms, *i));

        let mut out: Vec<PricePoint> = Vec::with_capacity(tagged.len());
        for (_, p) in tagged {
            match out.last_mut() {
                Some(last) if last.timestamp_ms == p.timestamp_ms => *last = p,
                _ => out.push(p),
            }
        }
        Self { points: out }
    }

    /// Insert or overwrite a single sample. Returns false if the price is invalid.
    pub fn upsert(&mut self, point: PricePoint) -> bool {
        if !point.is_valid() {
            return false;
        }
        match self
            .points
            .binary_search_by_key(&point.timestamp_ms, |p| p.timestamp_ms)
        {
            Ok(i) => self.points[i] = point,
            Err(i) => self.points.insert(i, point),
        }
        true
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<PricePoint> {
        self.points.first().copied()
    }

    pub fn last(&self) -> Option<PricePoint> {
        self.points.last().copied()
    }

    /// Latest point with `timestamp <= ts`. If there is none, the first point
    /// is returned when it lies at most `max_forward_gap_ms` after `ts`.
    pub fn nearest_as_of(&self, ts: i64, max_forward_gap_ms: i64) -> Option<PricePoint> {
        let idx = self.points.partition_point(|p| p.timestamp_ms <= ts);
        if idx > 0 {
            return Some(self.points[idx - 1]);
        }
        let first = self.points.first()?;
        if first.timestamp_ms.saturating_sub(ts) <= max_forward_gap_ms {
            Some(*first)
        } else {
            None
        }
    }

    /// Closest point by absolute distance; `None` when the closest one is more
    /// than `max_gap_ms` away. On an exact tie the earlier sample wins.
    pub fn nearest(&self, ts: i64, max_gap_ms: i64) -> Option<PricePoint> {
        let idx = self.points.partition_point(|p| p.timestamp_ms < ts);
        let after = self.points.get(idx);
        let before = idx.checked_sub(1).and_then(|i| self.points.get(i));

        let best = match (before, after) {
            (Some(b), Some(a)) => {
                if ts.saturating_sub(b.timestamp_ms) <= a.timestamp_ms.saturating_sub(ts) {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };

        if best.timestamp_ms.saturating_sub(ts).saturating_abs() <= max_gap_ms {
            Some(*best)
        } else {
            None
        }
    }

    /// Points with `from_ms <= timestamp <= to_ms`.
    pub fn window(&self, from_ms: i64, to_ms: i64) -> &[PricePoint] {
        let lo = self.points.partition_point(|p| p.timestamp_ms < from_ms);
        let hi = self.points.partition_point(|p| p.timestamp_ms <= to_ms);
        if lo >= hi {
            &[]
        } else {
            &self.points[lo..hi]
        }
    }
}

/// A series as delivered by the price collaborator, with its currency tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedSeries {
    pub currency: String,
    pub series: PriceSeries,
}
