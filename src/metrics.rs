// src/metrics.rs
//! Prometheus recorder for the `metrics` facade used across the crate.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install a process-global recorder without a listener; scrape via
    /// [`Metrics::render`].
    pub fn install_recorder() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        Ok(Self { handle })
    }

    /// Prometheus exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Install the recorder with an HTTP listener serving `/metrics` on `addr`.
/// Must be called inside a Tokio runtime.
pub fn serve_prometheus(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics listen address `{addr}`"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus: install exporter")?;
    tracing::info!(target: "metrics", %addr, "prometheus exporter listening");
    Ok(())
}
