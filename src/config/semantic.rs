// src/config/semantic.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Semantic overlay settings (`[semantic]` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    pub enabled: bool,
    /// Only "openai" is wired to a real client.
    pub provider: String,
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY.
    pub api_key: String,
    /// Real calls per UTC day; cache hits are free.
    pub daily_limit: u32,
    /// Top-N events (by |impact|) sent per request.
    pub batch_size: usize,
    /// Share of the raw forecast signal replaced by the semantic aggregate.
    pub blend_weight: f64,
    pub timeout_secs: u64,
    pub cache_dir: PathBuf,
    /// Risk added per cross-event conflict, and the cap on that addition.
    pub conflict_risk_step: f64,
    pub conflict_risk_cap: f64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: "ENV".to_string(),
            daily_limit: 20,
            batch_size: 8,
            blend_weight: 0.2,
            timeout_secs: 20,
            cache_dir: PathBuf::from("cache/semantic"),
            conflict_risk_step: 0.05,
            conflict_risk_cap: 0.15,
        }
    }
}

impl SemanticConfig {
    /// `None` when the key is "ENV" and the variable is unset or empty.
    pub fn resolve_api_key(&self) -> Option<String> {
        let raw = self.api_key.trim();
        if raw.eq_ignore_ascii_case("env") {
            return env::var("OPENAI_API_KEY")
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty());
        }
        (!raw.is_empty()).then(|| raw.to_string())
    }

    /// `SEMANTIC_TEST_MODE=mock` swaps the real client for a deterministic one.
    pub fn mock_mode() -> bool {
        env::var("SEMANTIC_TEST_MODE")
            .map(|v| v.eq_ignore_ascii_case("mock"))
            .unwrap_or(false)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.blend_weight) {
            bail!("semantic.blend_weight must lie in [0, 1]");
        }
        if self.batch_size == 0 {
            bail!("semantic.batch_size must be > 0");
        }
        if self.conflict_risk_step < 0.0 || !(0.0..=1.0).contains(&self.conflict_risk_cap) {
            bail!("semantic conflict risk step/cap out of range");
        }
        Ok(())
    }
}
