// src/pipeline/mod.rs
//! # Pipeline Scheduler
//! Runs every (provider × subject) job once, honouring per-job intervals.
//!
//! Per run:
//! 1. Plan jobs and read each job's run state; not-yet-due jobs are skipped.
//! 2. Fetch events once per provider that has due jobs, persist them.
//! 3. Drain due jobs through a fixed-size worker pool under one deadline.
//! 4. Write each job's state, then the aggregate `pipeline:all` row.
//! 5. Trim impacts past retention.
//!
//! A failing job never aborts its siblings; its state records the failure
//! and it becomes due again after the interval (or at once with `force`).

pub mod job;
pub mod plan;
pub mod rate_limit;
pub mod scheduler;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::config::PipelineConfig;
use crate::ingest::fetch_source;
use crate::ingest::health::SourceHealth;
use crate::ingest::types::{EventFeed, EventSource, PriceFeed, RawEvent};
use crate::pipeline::job::{JobOutcome, JobReport};
use crate::pipeline::plan::{plan_jobs, JobPlan};
use crate::pipeline::rate_limit::{Eligibility, RateLimiter};
use crate::semantic::client::{build_client, DynSemanticClient};
use crate::series::DAY_MS;
use crate::store::{
    get_job_state, put_event, put_job_state, trim_impacts_older_than, DynStore, JobRunState,
    JobStatus, PIPELINE_JOB_KEY,
};

pub use crate::pipeline::scheduler::{run_until_shutdown, spawn_pipeline_scheduler};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_jobs_total", "Pipeline jobs by terminal status.");
        describe_counter!("pipeline_events_stored_total", "Raw events upserted by pipeline runs.");
        describe_counter!(
            "pipeline_impacts_stored_total",
            "Impact records upserted by pipeline runs."
        );
        describe_gauge!("pipeline_last_run_ts", "Unix seconds of the last finished pipeline run.");
        describe_histogram!("job_duration_ms", "Wall time of executed jobs in milliseconds.");
    });
}

/// Shared collaborators for runs and on-demand forecasts.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<PipelineConfig>,
    pub events: Arc<dyn EventFeed>,
    pub prices: Arc<dyn PriceFeed>,
    pub store: DynStore,
    pub semantic: DynSemanticClient,
    pub health: Arc<SourceHealth>,
}

impl PipelineContext {
    /// Semantic client is built from `config.semantic`.
    pub fn new(
        config: PipelineConfig,
        events: Arc<dyn EventFeed>,
        prices: Arc<dyn PriceFeed>,
        store: DynStore,
    ) -> Self {
        let semantic = build_client(&config.semantic);
        Self {
            config: Arc::new(config),
            events,
            prices,
            store,
            semantic,
            health: Arc::new(SourceHealth::new()),
        }
    }

    pub fn with_semantic(mut self, client: DynSemanticClient) -> Self {
        self.semantic = client;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub force: bool,
    pub now_ms: i64,
    pub timeout: Duration,
}

impl RunOptions {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            force: cfg.pipeline.force,
            now_ms: chrono::Utc::now().timestamp_millis(),
            timeout: Duration::from_secs(cfg.pipeline.timeout_secs),
        }
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn at(mut self, now_ms: i64) -> Self {
        self.now_ms = now_ms;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunSummary {
    pub total_jobs: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub events_stored: usize,
    pub impacts_stored: usize,
    /// Deduplicated, in first-seen order.
    pub warnings: Vec<String>,
    /// Sorted by job key.
    pub jobs: Vec<JobReport>,
}

#[derive(Default)]
struct Warnings {
    seen: BTreeSet<String>,
    list: Vec<String>,
}

impl Warnings {
    fn push(&mut self, w: impl Into<String>) {
        let w = w.into();
        if self.seen.insert(w.clone()) {
            self.list.push(w);
        }
    }
}

/// Events fetched for one provider, shared by all its jobs.
enum Prefetch {
    Ready(Arc<Vec<RawEvent>>),
    /// Fetch exceeded the deadline; the provider's jobs fail.
    TimedOut,
}

struct QueuedJob {
    plan: JobPlan,
    events: Arc<Vec<RawEvent>>,
}

/// One pipeline run. Errors only when the run itself cannot be recorded;
/// job-level problems are in the summary.
pub async fn run_pipeline(ctx: &PipelineContext, opts: RunOptions) -> Result<PipelineRunSummary> {
    ensure_metrics_described();
    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + opts.timeout;
    let now_ms = opts.now_ms;
    let limiter = RateLimiter::new(opts.force);
    let mut warnings = Warnings::default();
    let mut reports: Vec<JobReport> = Vec::new();

    let plans = plan_jobs(&ctx.config);
    let total_jobs = plans.len();
    tracing::info!(
        target: "pipeline",
        jobs = total_jobs,
        force = opts.force,
        concurrency = ctx.config.pipeline.concurrency,
        "pipeline run started"
    );

    // 1) eligibility
    let mut due: Vec<JobPlan> = Vec::new();
    for plan in plans {
        let key = plan.key();
        let state = match get_job_state(ctx.store.as_ref(), &key).await {
            Ok(s) => s,
            Err(e) => {
                let msg = format!("reading run state: {e}");
                tracing::warn!(target: "pipeline", job = %key, error = %e, "run state unreadable");
                reports.push(JobReport::without_run(&plan, JobOutcome::Failed, msg));
                continue;
            }
        };
        match limiter.check(state.as_ref(), plan.interval_minutes, now_ms) {
            Eligibility::Run => due.push(plan),
            Eligibility::Skip {
                next_eligible_at_ms,
            } => {
                tracing::debug!(target: "pipeline", job = %key, next_eligible_at_ms, "job skipped");
                reports.push(JobReport::without_run(
                    &plan,
                    JobOutcome::Skipped,
                    format!("interval not elapsed; next eligible at {next_eligible_at_ms}"),
                ));
            }
        }
    }

    // 2) one fetch per provider with due jobs
    let mut prefetched: HashMap<EventSource, Prefetch> = HashMap::new();
    let mut events_stored = 0usize;
    for plan in &due {
        if prefetched.contains_key(&plan.provider) {
            continue;
        }
        let limit = due
            .iter()
            .filter(|p| p.provider == plan.provider)
            .map(|p| p.event_limit)
            .max()
            .unwrap_or(plan.event_limit);
        let fetch = fetch_source(ctx.events.as_ref(), plan.provider, limit, &ctx.health);
        let entry = match tokio::time::timeout_at(deadline, fetch).await {
            Ok(fetched) => {
                if !fetched.status.ok {
                    warnings.push(format!(
                        "source {} unavailable: {}",
                        plan.provider,
                        fetched.status.error.as_deref().unwrap_or("unknown error")
                    ));
                }
                for ev in &fetched.events {
                    match put_event(ctx.store.as_ref(), ev).await {
                        Ok(()) => events_stored += 1,
                        Err(e) => warnings.push(format!("storing events for {}: {e}", plan.provider)),
                    }
                }
                Prefetch::Ready(Arc::new(fetched.events))
            }
            Err(_) => {
                warnings.push(format!("source {} fetch timed out", plan.provider));
                Prefetch::TimedOut
            }
        };
        prefetched.insert(plan.provider, entry);
    }

    // 3) worker pool
    let mut queue: VecDeque<QueuedJob> = VecDeque::new();
    let mut finished: Vec<(JobReport, Vec<String>)> = Vec::new();
    for plan in due {
        match prefetched.get(&plan.provider) {
            Some(Prefetch::Ready(events)) => queue.push_back(QueuedJob {
                events: Arc::clone(events),
                plan,
            }),
            _ => finished.push((
                JobReport::without_run(&plan, JobOutcome::Failed, "event fetch timed out"),
                Vec::new(),
            )),
        }
    }
    let queue = Arc::new(Mutex::new(queue));
    let workers = ctx.config.pipeline.concurrency.max(1);
    let mut set = JoinSet::new();
    for worker in 0..workers {
        let ctx = ctx.clone();
        let queue = Arc::clone(&queue);
        set.spawn(async move {
            let mut out = Vec::new();
            loop {
                let next = queue.lock().unwrap_or_else(|p| p.into_inner()).pop_front();
                let Some(job) = next else { break };
                out.push(run_one(&ctx, job, now_ms, deadline).await);
            }
            tracing::debug!(target: "pipeline", worker, done = out.len(), "worker drained");
            out
        });
    }
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(batch) => finished.extend(batch),
            Err(e) => warnings.push(format!("pipeline worker aborted: {e}")),
        }
    }

    // 4) per-job state
    for (mut report, job_warnings) in finished {
        for w in job_warnings {
            warnings.push(w);
        }
        let state = JobRunState {
            job_key: report.job_key.clone(),
            last_ran_at_ms: Some(now_ms),
            last_status: match report.outcome {
                JobOutcome::Success => JobStatus::Success,
                _ => JobStatus::Failed,
            },
            last_message: report.message.clone(),
        };
        if let Err(e) = put_job_state(ctx.store.as_ref(), &state).await {
            warnings.push(format!("writing run state {}: {e}", report.job_key));
            if report.outcome == JobOutcome::Success {
                report.outcome = JobOutcome::Failed;
                report.message = format!("{}; run state not persisted: {e}", report.message);
            }
        }
        reports.push(report);
    }

    reports.sort_by(|a, b| a.job_key.cmp(&b.job_key));
    let count = |o: JobOutcome| reports.iter().filter(|r| r.outcome == o).count();
    let mut summary = PipelineRunSummary {
        total_jobs,
        success: count(JobOutcome::Success),
        failed: count(JobOutcome::Failed),
        skipped: count(JobOutcome::Skipped),
        events_stored,
        impacts_stored: reports.iter().map(|r| r.impacts_stored).sum(),
        warnings: Vec::new(),
        jobs: Vec::new(),
    };

    // 5) retention
    if let Some(days) = ctx.config.pipeline.retention_days {
        let cutoff = now_ms.saturating_sub(i64::from(days).saturating_mul(DAY_MS));
        if let Err(e) = trim_impacts_older_than(ctx.store.as_ref(), cutoff).await {
            warnings.push(format!("retention trim failed: {e}"));
        }
    }

    let aggregate_state = JobRunState {
        job_key: PIPELINE_JOB_KEY.to_string(),
        last_ran_at_ms: Some(now_ms),
        last_status: if summary.failed == 0 {
            JobStatus::Success
        } else {
            JobStatus::Failed
        },
        last_message: format!(
            "{} jobs: {} success, {} failed, {} skipped; {} events, {} impacts",
            summary.total_jobs,
            summary.success,
            summary.failed,
            summary.skipped,
            summary.events_stored,
            summary.impacts_stored
        ),
    };
    put_job_state(ctx.store.as_ref(), &aggregate_state)
        .await
        .context("writing pipeline run state")?;

    for r in &reports {
        counter!("pipeline_jobs_total", "status" => r.outcome.as_str()).increment(1);
    }
    counter!("pipeline_events_stored_total").increment(summary.events_stored as u64);
    counter!("pipeline_impacts_stored_total").increment(summary.impacts_stored as u64);
    gauge!("pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

    summary.warnings = warnings.list;
    summary.jobs = reports;
    tracing::info!(
        target: "pipeline",
        total = summary.total_jobs,
        success = summary.success,
        failed = summary.failed,
        skipped = summary.skipped,
        events = summary.events_stored,
        impacts = summary.impacts_stored,
        warnings = summary.warnings.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "pipeline run finished"
    );
    Ok(summary)
}

/// Runs one job in its own task so a panic is contained, under the run
/// deadline.
async fn run_one(
    ctx: &PipelineContext,
    job: QueuedJob,
    now_ms: i64,
    deadline: tokio::time::Instant,
) -> (JobReport, Vec<String>) {
    let key = job.plan.key();
    if tokio::time::Instant::now() >= deadline {
        return (
            JobReport::without_run(&job.plan, JobOutcome::Failed, "pipeline deadline passed before start"),
            Vec::new(),
        );
    }

    let started = Instant::now();
    let task_ctx = ctx.clone();
    let plan = job.plan.clone();
    let events = Arc::clone(&job.events);
    let handle = tokio::spawn(async move {
        tokio::time::timeout_at(deadline, job::execute(&task_ctx, &plan, &events, now_ms)).await
    });

    let mut report = JobReport::without_run(&job.plan, JobOutcome::Failed, String::new());
    report.events_seen = job.events.len();
    let mut warnings = Vec::new();
    match handle.await {
        Ok(Ok(Ok(done))) => {
            report.outcome = JobOutcome::Success;
            report.impacts_stored = done.impacts.len();
            report.message = done.message;
            report.forecast = done.forecast;
            warnings = done.warnings;
        }
        Ok(Ok(Err(e))) => report.message = format!("{e:#}"),
        Ok(Err(_)) => report.message = "timed out at pipeline deadline".to_string(),
        Err(e) => report.message = format!("job task aborted: {e}"),
    }
    report.duration_ms = started.elapsed().as_millis() as u64;
    histogram!("job_duration_ms").record(report.duration_ms as f64);

    match report.outcome {
        JobOutcome::Success => tracing::info!(
            target: "pipeline",
            job = %key,
            impacts = report.impacts_stored,
            duration_ms = report.duration_ms,
            "job succeeded"
        ),
        _ => tracing::warn!(
            target: "pipeline",
            job = %key,
            error = %report.message,
            duration_ms = report.duration_ms,
            "job failed"
        ),
    }
    (report, warnings)
}
