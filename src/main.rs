//! Pipeline runner, the binary entrypoint.
//! Loads config, wires the store and fixture collaborators, then runs the
//! pipeline once (or on `pipeline.run_every_secs`) and prints the summary.

use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_event_impact::{
    context_from_config, forecast_subject, metrics::serve_prometheus, run_pipeline,
    run_until_shutdown, spawn_pipeline_scheduler, PipelineConfig, RunOptions,
};

/// Compact logs by default, JSON lines with `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_event_impact=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load_default()?;
    if let Some(addr) = cfg.pipeline.metrics_addr.as_deref() {
        serve_prometheus(addr)?;
    }
    let every = cfg.pipeline.run_every_secs;
    let ctx = context_from_config(cfg)?;

    if let Some(secs) = every {
        tracing::info!(target: "pipeline", every_secs = secs, "starting interval scheduler");
        let handle = spawn_pipeline_scheduler(ctx, Duration::from_secs(secs));
        run_until_shutdown(handle, tokio::signal::ctrl_c()).await;
        return Ok(());
    }

    let opts = RunOptions::from_config(&ctx.config);
    let summary = run_pipeline(&ctx, opts).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    for subject in &ctx.config.subjects {
        let snap = forecast_subject(&ctx, subject, opts.now_ms).await?;
        println!("{}", serde_json::to_string_pretty(&snap)?);
    }
    Ok(())
}
