// src/config/mod.rs
//! Pipeline configuration.
//!
//! Resolution order: `$PIPELINE_CONFIG_PATH` → `config/pipeline.toml` →
//! built-in defaults, then env overrides on top. Every heuristic table
//! (severities, decay, horizons, forecast weights, relevance) is plain data
//! here so it can be retuned without touching control flow.

pub mod semantic;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::analyze::classify::SeverityTable;
use crate::analyze::impact::ScoringTable;
use crate::analyze::relevance::RelevanceWeights;
use crate::forecast::ForecastTable;
use crate::ingest::types::{EventSource, Subject};

pub use crate::config::semantic::SemanticConfig;

pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Worker pool size.
    pub concurrency: usize,
    /// Whole-run deadline.
    pub timeout_secs: u64,
    /// Ignore per-job intervals.
    pub force: bool,
    pub price_history_days: u32,
    /// Impacts older than this are trimmed after each run; `None` keeps all.
    pub retention_days: Option<u32>,
    /// Binary only: repeat the run on this interval instead of exiting.
    pub run_every_secs: Option<u64>,
    pub fixture_dir: PathBuf,
    /// Binary only: Prometheus listener address, e.g. `0.0.0.0:9000`.
    pub metrics_addr: Option<String>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            concurrency: 2,
            timeout_secs: 120,
            force: false,
            price_history_days: 90,
            retention_days: Some(365),
            run_every_secs: None,
            fixture_dir: PathBuf::from("fixtures"),
            metrics_addr: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub source: EventSource,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum minutes between two runs of the same (provider, subject) job.
    pub interval_minutes: u64,
    #[serde(default = "default_event_limit")]
    pub event_limit: usize,
}

fn default_true() -> bool {
    true
}

fn default_event_limit() -> usize {
    50
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreBackend::Memory),
            "file" | "json" => Ok(StoreBackend::File),
            "sqlite" | "sql" => Ok(StoreBackend::Sqlite),
            other => bail!("unknown store backend `{other}` (memory|file|sqlite)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Directory for `file`, database file for `sqlite`.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: PathBuf::from("data/store"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pipeline: PipelineSection,
    pub providers: Vec<ProviderConfig>,
    pub subjects: Vec<Subject>,
    pub classifier: SeverityTable,
    pub scoring: ScoringTable,
    pub relevance: RelevanceWeights,
    pub forecast: ForecastTable,
    pub semantic: SemanticConfig,
    pub store: StoreConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineSection::default(),
            providers: vec![
                ProviderConfig {
                    source: EventSource::PatchNotes,
                    enabled: true,
                    interval_minutes: 360,
                    event_limit: default_event_limit(),
                },
                ProviderConfig {
                    source: EventSource::ProPlayers,
                    enabled: true,
                    interval_minutes: 120,
                    event_limit: default_event_limit(),
                },
            ],
            subjects: Vec::new(),
            classifier: SeverityTable::default(),
            scoring: ScoringTable::default(),
            relevance: RelevanceWeights::default(),
            forecast: ForecastTable::default(),
            semantic: SemanticConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// `$PIPELINE_CONFIG_PATH` (must exist) → `config/pipeline.toml` → defaults.
    /// Env overrides are applied and the result validated.
    pub fn load_default() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_PIPELINE_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    bail!(
                        "{ENV_PIPELINE_CONFIG_PATH} points to non-existent path {}",
                        pb.display()
                    );
                }
                Self::read_file(&pb)?
            }
            Err(_) => {
                let default = PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH);
                if default.exists() {
                    Self::read_file(&default)?
                } else {
                    tracing::info!(target: "config", "no pipeline config file, using defaults");
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load one file, apply env overrides and validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::read_file(path)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let cfg = Self::from_toml_str(&content)
            .with_context(|| format!("parsing pipeline config {}", path.display()))?;
        tracing::info!(target: "config", path = %path.display(), "pipeline config loaded");
        Ok(cfg)
    }

    /// Parse only; no env overrides, no validation.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(n) = env_parse::<usize>("PIPELINE_CONCURRENCY")? {
            self.pipeline.concurrency = n;
        }
        if let Some(n) = env_parse::<u64>("PIPELINE_TIMEOUT_SECS")? {
            self.pipeline.timeout_secs = n;
        }
        if let Some(b) = env_flag("PIPELINE_FORCE")? {
            self.pipeline.force = b;
        }
        if let Some(b) = env_flag("SEMANTIC_ENABLED")? {
            self.semantic.enabled = b;
        }
        if let Some(kind) = env_parse::<StoreBackend>("STORE_BACKEND")? {
            self.store.backend = kind;
        }
        if let Some(p) = env_nonempty("STORE_PATH") {
            self.store.path = PathBuf::from(p);
        }
        if let Some(p) = env_nonempty("FIXTURE_DIR") {
            self.pipeline.fixture_dir = PathBuf::from(p);
        }
        if let Some(addr) = env_nonempty("METRICS_ADDR") {
            self.pipeline.metrics_addr = Some(addr);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.concurrency < 1 {
            bail!("pipeline.concurrency must be >= 1");
        }
        if self.pipeline.timeout_secs == 0 {
            bail!("pipeline.timeout_secs must be > 0");
        }

        let mut seen = HashSet::new();
        for p in &self.providers {
            if !seen.insert(p.source) {
                bail!("provider `{}` configured twice", p.source);
            }
            if p.event_limit == 0 {
                bail!("provider `{}`: event_limit must be > 0", p.source);
            }
        }
        let mut ids = HashSet::new();
        for s in &self.subjects {
            if !ids.insert(s.id) {
                bail!("subject id {} configured twice", s.id);
            }
            if s.name.trim().is_empty() {
                bail!("subject {} has an empty name", s.id);
            }
        }

        let sc = &self.scoring;
        if sc.decay_half_life_days.patch_notes <= 0.0 || sc.decay_half_life_days.pro_players <= 0.0
        {
            bail!("scoring.decay_half_life_days must be positive");
        }
        if sc.flat_threshold_pct < 0.0 || sc.return_cap_pct <= 0.0 {
            bail!("scoring.flat_threshold_pct must be >= 0 and return_cap_pct > 0");
        }
        let g = &sc.horizon_gap_hours;
        if g.h1 <= 0 || g.h24 <= 0 || g.h72 <= 0 || sc.baseline_forward_gap_hours < 0 {
            bail!("scoring horizon gaps must be positive");
        }
        if !(0.0..=1.0).contains(&self.relevance.fuzzy_threshold) {
            bail!("relevance.fuzzy_threshold must lie in [0, 1]");
        }

        self.forecast.validate()?;
        self.semantic.validate()?;
        Ok(())
    }

    pub fn provider(&self, source: EventSource) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.source == source)
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_nonempty(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid {name}=`{raw}`: {e}")),
        None => Ok(None),
    }
}

fn env_flag(name: &str) -> Result<Option<bool>> {
    match env_nonempty(name).map(|v| v.to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => bail!("invalid {name}=`{v}`: expected a boolean"),
        },
    }
}
