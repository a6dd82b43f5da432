// src/pipeline/scheduler.rs
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::pipeline::{run_pipeline, PipelineContext, RunOptions};

/// Run the pipeline on a fixed interval with `force = false`; per-job
/// intervals still decide what actually executes. The first tick fires
/// immediately. Abort the handle to stop.
pub fn spawn_pipeline_scheduler(ctx: PipelineContext, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let opts = RunOptions::from_config(&ctx.config).forced(false);
            match run_pipeline(&ctx, opts).await {
                Ok(summary) => tracing::info!(
                    target: "pipeline",
                    success = summary.success,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "scheduled run tick"
                ),
                Err(e) => tracing::error!(target: "pipeline", error = %format!("{e:#}"), "scheduled run failed"),
            }
        }
    })
}

/// Wait on a scheduler until `shutdown` resolves, then abort it. Returns
/// early if the scheduler task ends on its own (panic or cancellation).
pub async fn run_until_shutdown<F>(mut handle: JoinHandle<()>, shutdown: F)
where
    F: Future,
{
    tokio::select! {
        _ = shutdown => {
            tracing::info!(target: "pipeline", "shutdown requested");
            handle.abort();
        }
        res = &mut handle => {
            if let Err(e) = res {
                tracing::error!(target: "pipeline", error = %e, "scheduler task ended");
            }
        }
    }
}
