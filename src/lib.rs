// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod config;
pub mod forecast;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod semantic;
pub mod series;
pub mod store;

use std::sync::Arc;

use anyhow::{Context, Result};

// ---- Re-exports for stable public API ----
pub use crate::config::PipelineConfig;
pub use crate::forecast::{forecast_subject, ForecastSnapshot};
pub use crate::pipeline::{
    run_pipeline, run_until_shutdown, spawn_pipeline_scheduler, PipelineContext,
    PipelineRunSummary, RunOptions,
};

/// Context wired to the configured store and the fixture directory.
pub fn context_from_config(cfg: PipelineConfig) -> Result<PipelineContext> {
    let store = store::open_store(&cfg.store).context("opening store")?;
    let fixtures = Arc::new(ingest::providers::fixture::FixtureDir::new(
        cfg.pipeline.fixture_dir.clone(),
    ));
    Ok(PipelineContext::new(cfg, fixtures.clone(), fixtures, store))
}
