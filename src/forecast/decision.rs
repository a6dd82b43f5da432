// src/forecast/decision.rs
//! Trend/risk classification and the recommendation table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Sideways,
    Bearish,
}

impl Trend {
    /// Inclusive at both thresholds: `signal == threshold` is bullish.
    pub fn from_signal(signal: f64, threshold: f64) -> Self {
        if signal >= threshold {
            Trend::Bullish
        } else if signal <= -threshold {
            Trend::Bearish
        } else {
            Trend::Sideways
        }
    }

    fn index(self) -> usize {
        match self {
            Trend::Bullish => 0,
            Trend::Sideways => 1,
            Trend::Bearish => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskCutoffs {
    /// risk < low → Low
    pub low: f64,
    /// risk < medium → Medium, else High
    pub medium: f64,
}

impl Default for RiskCutoffs {
    fn default() -> Self {
        Self {
            low: 0.35,
            medium: 0.65,
        }
    }
}

impl RiskLevel {
    pub fn from_score(risk: f64, cut: &RiskCutoffs) -> Self {
        if risk < cut.low {
            RiskLevel::Low
        } else if risk < cut.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    fn index(self) -> usize {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Medium => 1,
            RiskLevel::High => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accumulate,
    BuySmall,
    Hold,
    Watch,
    ReduceExposure,
    Sell,
}

impl Recommendation {
    pub fn text(&self) -> &'static str {
        match self {
            Recommendation::Accumulate => "Accumulate: momentum and events agree upward.",
            Recommendation::BuySmall => "Buy small: upward bias, size positions for moderate risk.",
            Recommendation::Hold => "Hold: no clear direction.",
            Recommendation::Watch => "Watch: signal is unreliable at this risk level.",
            Recommendation::ReduceExposure => "Reduce exposure: downward bias.",
            Recommendation::Sell => "Sell: downward trend with low risk of reversal.",
        }
    }
}

/// Rows: bullish, sideways, bearish. Columns: low, medium, high risk.
pub const DECISION_TABLE: [[Recommendation; 3]; 3] = [
    [
        Recommendation::Accumulate,
        Recommendation::BuySmall,
        Recommendation::Watch,
    ],
    [Recommendation::Hold, Recommendation::Hold, Recommendation::Watch],
    [
        Recommendation::Sell,
        Recommendation::ReduceExposure,
        Recommendation::ReduceExposure,
    ],
];

pub fn recommend(trend: Trend, risk: RiskLevel) -> Recommendation {
    DECISION_TABLE[trend.index()][risk.index()]
}
