// src/pipeline/job.rs
//! One (provider, subject) job: fetch prices, score, upsert, forecast.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analyze::impact::{Direction, ImpactRecord, ImpactScorer};
use crate::analyze::score_events;
use crate::forecast::{blend_forecast, ForecastSnapshot};
use crate::ingest::types::{EventSource, RawEvent};
use crate::pipeline::plan::JobPlan;
use crate::pipeline::PipelineContext;
use crate::store::{impacts_for_subject, put_impact};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Success,
    Failed,
    /// Interval not elapsed. Not an error.
    Skipped,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Success => "success",
            JobOutcome::Failed => "failed",
            JobOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_key: String,
    pub provider: EventSource,
    pub subject_id: i64,
    pub outcome: JobOutcome,
    pub message: String,
    pub events_seen: usize,
    pub impacts_stored: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<ForecastSnapshot>,
}

impl JobReport {
    pub(crate) fn without_run(plan: &JobPlan, outcome: JobOutcome, message: impl Into<String>) -> Self {
        Self {
            job_key: plan.key(),
            provider: plan.provider,
            subject_id: plan.subject.id,
            outcome,
            message: message.into(),
            events_seen: 0,
            impacts_stored: 0,
            duration_ms: 0,
            forecast: None,
        }
    }
}

/// What a successful execution produced.
#[derive(Debug)]
pub(crate) struct JobSuccess {
    pub impacts: Vec<ImpactRecord>,
    pub forecast: Option<ForecastSnapshot>,
    pub warnings: Vec<String>,
    pub message: String,
}

/// Errors are job failures (collaborator or persistence); degradations of
/// optional parts come back as warnings.
pub(crate) async fn execute(
    ctx: &PipelineContext,
    plan: &JobPlan,
    events: &[RawEvent],
    now_ms: i64,
) -> Result<JobSuccess> {
    let cfg = &ctx.config;
    let subject = &plan.subject;

    let priced = ctx
        .prices
        .fetch_price_series(subject.id, cfg.pipeline.price_history_days)
        .await
        .with_context(|| format!("fetching price series for subject {}", subject.id))?;

    let scorer = ImpactScorer::new(cfg.scoring, cfg.relevance);
    let impacts = score_events(
        &scorer,
        &cfg.classifier,
        subject,
        events,
        &priced.series,
        now_ms,
    );
    for rec in &impacts {
        put_impact(ctx.store.as_ref(), rec)
            .await
            .with_context(|| format!("storing impact {}", rec.key()))?;
    }
    let insufficient = impacts
        .iter()
        .filter(|r| r.direction == Direction::Insufficient)
        .count();

    // Forecast over everything stored for the subject, not just this batch.
    let stored = impacts_for_subject(ctx.store.as_ref(), subject.id)
        .await
        .with_context(|| format!("loading impacts for subject {}", subject.id))?;
    let forecast = blend_forecast(ctx, subject, &stored, &priced.series, now_ms, Vec::new()).await;

    let message = format!(
        "scored {} events ({} insufficient) against {} {} samples; signal {:+.3} {:?}",
        impacts.len(),
        insufficient,
        priced.series.len(),
        priced.currency,
        forecast.final_signal,
        forecast.trend,
    );

    Ok(JobSuccess {
        impacts,
        warnings: forecast.warnings.clone(),
        forecast: Some(forecast),
        message,
    })
}
