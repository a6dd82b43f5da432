// tests/forecast_bounds.rs
// Aggregator bounds over random inputs, plus decision boundaries.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use market_event_impact::forecast::decision::{
    recommend, Recommendation, RiskCutoffs, RiskLevel, Trend,
};
use market_event_impact::forecast::factors::{MomentumFactor, OrderBookFactor};
use market_event_impact::forecast::{aggregate, ForecastInputs, ForecastTable, SemanticBlend};
use market_event_impact::semantic::SemanticAggregate;

fn maybe<T>(rng: &mut StdRng, f: impl FnOnce(&mut StdRng) -> T) -> Option<T> {
    if rng.random_bool(0.7) {
        Some(f(rng))
    } else {
        None
    }
}

fn random_inputs(rng: &mut StdRng) -> ForecastInputs {
    ForecastInputs {
        // Deliberately out of range sometimes; the aggregator clamps.
        momentum: maybe(rng, |r| MomentumFactor {
            score: r.random_range(-1.5..1.5),
            r1d: None,
            r7d: None,
            r30d: None,
            volatility: maybe(r, |r| r.random_range(0.0..1.2)),
        }),
        order_book: maybe(rng, |r| OrderBookFactor {
            score: r.random_range(-1.0..1.0),
            spread_pct: r.random_range(0.0..40.0),
            spread_risk: r.random_range(0.0..1.0),
            low_liquidity: r.random_range(0.0..1.0),
        }),
        patch_notes: maybe(rng, |r| r.random_range(-1.2..1.2)),
        pro_players: maybe(rng, |r| r.random_range(-1.2..1.2)),
        attention: maybe(rng, |r| r.random_range(0.0..1.0)),
    }
}

#[test]
fn final_signal_and_risk_stay_bounded() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let table = ForecastTable::default();
    for i in 0..2_000 {
        let inputs = random_inputs(&mut rng);
        let sem = SemanticAggregate {
            signal: rng.random_range(-1.0..1.0),
            used: 1,
            duplicates_excluded: 0,
            conflicts: rng.random_range(0..6),
            judgments: Vec::new(),
        };
        let blend = rng.random_bool(0.5).then_some(SemanticBlend {
            aggregate: &sem,
            weight: 0.2,
            conflict_step: 0.05,
            conflict_cap: 0.15,
        });
        let snap = aggregate(1, &inputs, blend, &table, 0);
        assert!((-1.0..=1.0).contains(&snap.final_signal), "case {i}: {snap:?}");
        assert!((0.0..=1.0).contains(&snap.risk_score), "case {i}: {snap:?}");
        assert!(snap.confidence <= 100);
        assert_eq!(snap.recommendation, recommend(snap.trend, snap.risk_level));
        assert_eq!(snap.recommendation_text, snap.recommendation.text());
        assert_eq!(snap.semantic_signal.is_some(), blend.is_some());
    }
}

#[test]
fn trend_boundary_is_inclusive() {
    let t = 0.18;
    assert_eq!(Trend::from_signal(0.18, t), Trend::Bullish);
    assert_eq!(Trend::from_signal(0.1799, t), Trend::Sideways);
    assert_eq!(Trend::from_signal(-0.18, t), Trend::Bearish);
    assert_eq!(Trend::from_signal(-0.1799, t), Trend::Sideways);
    assert_eq!(Trend::from_signal(0.0, t), Trend::Sideways);
}

#[test]
fn risk_levels_follow_cutoffs() {
    let cut = RiskCutoffs::default();
    assert_eq!(RiskLevel::from_score(0.0, &cut), RiskLevel::Low);
    assert_eq!(RiskLevel::from_score(0.35, &cut), RiskLevel::Medium);
    assert_eq!(RiskLevel::from_score(0.6499, &cut), RiskLevel::Medium);
    assert_eq!(RiskLevel::from_score(0.65, &cut), RiskLevel::High);
}

#[test]
fn decision_table_corners() {
    assert_eq!(recommend(Trend::Bullish, RiskLevel::Low), Recommendation::Accumulate);
    assert_eq!(recommend(Trend::Bullish, RiskLevel::High), Recommendation::Watch);
    assert_eq!(recommend(Trend::Sideways, RiskLevel::Medium), Recommendation::Hold);
    assert_eq!(recommend(Trend::Bearish, RiskLevel::Low), Recommendation::Sell);
    assert_eq!(
        recommend(Trend::Bearish, RiskLevel::High),
        Recommendation::ReduceExposure
    );
}

#[test]
fn no_data_is_neutral_with_unknown_risk() {
    let snap = aggregate(7, &ForecastInputs::default(), None, &ForecastTable::default(), 42);
    assert_eq!(snap.subject_id, 7);
    assert_eq!(snap.generated_at_ms, 42);
    assert_eq!(snap.raw_signal, 0.0);
    assert_eq!(snap.final_signal, 0.0);
    // volatility, spread and liquidity unknown (0.5 each), no conflict
    assert!((snap.risk_score - 0.4).abs() < 1e-9);
    assert_eq!(snap.trend, Trend::Sideways);
    assert_eq!(snap.risk_level, RiskLevel::Medium);
    assert_eq!(snap.recommendation, Recommendation::Hold);
    assert_eq!(snap.coverage, 0.0);
    assert_eq!(snap.confidence, 12);
}

#[test]
fn full_bullish_inputs_accumulate() {
    let inputs = ForecastInputs {
        momentum: Some(MomentumFactor {
            score: 1.0,
            r1d: Some(6.0),
            r7d: Some(12.0),
            r30d: Some(25.0),
            volatility: Some(0.0),
        }),
        order_book: Some(OrderBookFactor {
            score: 1.0,
            spread_pct: 0.0,
            spread_risk: 0.0,
            low_liquidity: 0.0,
        }),
        patch_notes: Some(1.0),
        pro_players: Some(1.0),
        attention: Some(1.0),
    };
    let snap = aggregate(1, &inputs, None, &ForecastTable::default(), 0);
    assert!(snap.final_signal > 0.99);
    assert_eq!(snap.risk_score, 0.0);
    assert_eq!(snap.trend, Trend::Bullish);
    assert_eq!(snap.recommendation, Recommendation::Accumulate);
    assert_eq!(snap.coverage, 1.0);
    assert_eq!(snap.confidence, 100);
}

#[test]
fn opposing_sources_add_conflict_risk() {
    let agree = ForecastInputs {
        patch_notes: Some(0.8),
        pro_players: Some(0.4),
        ..Default::default()
    };
    let disagree = ForecastInputs {
        patch_notes: Some(0.8),
        pro_players: Some(-0.4),
        ..Default::default()
    };
    let table = ForecastTable::default();
    let a = aggregate(1, &agree, None, &table, 0);
    let b = aggregate(1, &disagree, None, &table, 0);
    // conflict = |0.8 - (-0.4)| / 2 = 0.6, weighted 0.2
    assert!((b.risk_score - a.risk_score - 0.12).abs() < 1e-9);
}
