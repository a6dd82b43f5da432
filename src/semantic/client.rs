// src/semantic/client.rs
//! Semantic client adapters: disabled, mock/static, OpenAI, plus a caching
//! wrapper with a persisted per-day call limit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::analyze::impact::Direction;
use crate::config::SemanticConfig;
use crate::semantic::{DegradeReason, SemanticBatch};

/// Sends one batch and returns the raw JSON text of the reply. Parsing and
/// validation happen in the caller.
#[async_trait]
pub trait SemanticClient: Send + Sync {
    async fn analyze(&self, batch: &SemanticBatch) -> Result<String, DegradeReason>;
    fn name(&self) -> &'static str;
}

pub type DynSemanticClient = Arc<dyn SemanticClient>;

/// `SEMANTIC_TEST_MODE=mock` → [`MockClient`]; disabled or keyless →
/// [`DisabledClient`]; otherwise OpenAI behind [`CachingClient`].
pub fn build_client(cfg: &SemanticConfig) -> DynSemanticClient {
    if SemanticConfig::mock_mode() {
        tracing::info!(target: "semantic", "semantic overlay in mock mode");
        return Arc::new(MockClient);
    }
    if !cfg.enabled {
        return Arc::new(DisabledClient);
    }
    match cfg.provider.to_ascii_lowercase().as_str() {
        "openai" => {
            let Some(key) = cfg.resolve_api_key() else {
                tracing::warn!(target: "semantic", "semantic overlay enabled but no API key; disabling");
                return Arc::new(DisabledClient);
            };
            match OpenAiClient::new(key, &cfg.model, Duration::from_secs(cfg.timeout_secs)) {
                Ok(c) => Arc::new(CachingClient::new(c, cfg.cache_dir.clone(), cfg.daily_limit)),
                Err(e) => {
                    tracing::warn!(target: "semantic", error = %e, "building OpenAI client failed; disabling");
                    Arc::new(DisabledClient)
                }
            }
        }
        other => {
            tracing::warn!(target: "semantic", provider = other, "unsupported semantic provider; disabling");
            Arc::new(DisabledClient)
        }
    }
}

pub struct DisabledClient;

#[async_trait]
impl SemanticClient for DisabledClient {
    async fn analyze(&self, _batch: &SemanticBatch) -> Result<String, DegradeReason> {
        Err(DegradeReason::Disabled)
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Deterministic local stand-in: echoes each item's own direction with
/// medium confidence and marks nothing as duplicate.
pub struct MockClient;

#[async_trait]
impl SemanticClient for MockClient {
    async fn analyze(&self, batch: &SemanticBatch) -> Result<String, DegradeReason> {
        let events: Vec<serde_json::Value> = batch
            .items
            .iter()
            .map(|it| {
                let dir = match it.direction {
                    Direction::Up => "up",
                    Direction::Down => "down",
                    Direction::Flat | Direction::Insufficient => "flat",
                };
                serde_json::json!({
                    "id": it.id,
                    "direction": dir,
                    "confidence": 0.5,
                    "relevance": it.relevance.unwrap_or(1.0),
                    "hype_score": 0.0,
                    "reliability": 0.8,
                    "duplicate_of": null,
                    "conflicts_with": [],
                    "evidence": "mock"
                })
            })
            .collect();
        Ok(serde_json::json!({ "events": events }).to_string())
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Replies with a fixed outcome and counts calls.
pub struct StaticClient {
    reply: Result<String, DegradeReason>,
    calls: AtomicUsize,
}

impl StaticClient {
    pub fn replying(body: impl Into<String>) -> Self {
        Self {
            reply: Ok(body.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: DegradeReason) -> Self {
        Self {
            reply: Err(reason),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticClient for StaticClient {
    async fn analyze(&self, _batch: &SemanticBatch) -> Result<String, DegradeReason> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }
    fn name(&self) -> &'static str {
        "static"
    }
}

/// OpenAI Chat Completions in JSON mode.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

const SYSTEM_PROMPT: &str = "You judge game-update and pro-player news for their effect on the \
price of one tradable item. For every input event return an object with: id (copied), \
direction (up|down|flat), confidence, relevance, hype_score, reliability (all 0..1), \
duplicate_of (id of an earlier input event reporting the same news, or null), \
conflicts_with (ids of input events that contradict it), evidence (one short sentence). \
Reply with JSON only: {\"events\": [...]}.";

impl OpenAiClient {
    pub fn new(api_key: String, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("market-event-impact/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl SemanticClient for OpenAiClient {
    async fn analyze(&self, batch: &SemanticBatch) -> Result<String, DegradeReason> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            r#type: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let input = serde_json::to_string(batch)
            .map_err(|e| DegradeReason::Malformed(format!("encoding batch: {e}")))?;
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &input,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                r#type: "json_object",
            },
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DegradeReason::Timeout
                } else {
                    DegradeReason::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DegradeReason::RateLimited);
        }
        if !status.is_success() {
            return Err(DegradeReason::Transport(format!("http status {status}")));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| DegradeReason::Malformed(format!("response envelope: {e}")))?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| DegradeReason::Malformed("empty completion".into()))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Caching wrapper (file cache + daily limit)
// ------------------------------------------------------------

pub struct CachingClient<C: SemanticClient> {
    inner: C,
    cache_dir: PathBuf,
    daily_limit: u32,
    counter: Mutex<DailyCounter>,
}

impl<C: SemanticClient> CachingClient<C> {
    pub fn new(inner: C, cache_dir: PathBuf, daily_limit: u32) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            tracing::warn!(target: "semantic", dir = %cache_dir.display(), error = %e, "cache dir not created");
        }
        let counter = Mutex::new(load_daily_counter(&cache_dir).unwrap_or_default());
        Self {
            inner,
            cache_dir,
            daily_limit,
            counter,
        }
    }

    pub fn calls_today(&self) -> u32 {
        self.lock_counter().count
    }

    fn lock_counter(&self) -> std::sync::MutexGuard<'_, DailyCounter> {
        self.counter.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl<C: SemanticClient> SemanticClient for CachingClient<C> {
    async fn analyze(&self, batch: &SemanticBatch) -> Result<String, DegradeReason> {
        let key = cache_key(batch);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            tracing::debug!(target: "semantic", key = %key, "semantic cache hit");
            return Ok(hit);
        }

        // Only real calls count against the limit. The slot is reserved
        // before the call and handed back if the call fails.
        let reserved_on = {
            let mut g = self.lock_counter();
            if g.is_expired() {
                g.reset_to_today();
            }
            if g.count >= self.daily_limit {
                return Err(DegradeReason::RateLimited);
            }
            g.count += 1;
            let _ = save_daily_counter(&self.cache_dir, &g);
            g.date.clone()
        };

        let fresh = match self.inner.analyze(batch).await {
            Ok(body) => body,
            Err(reason) => {
                let mut g = self.lock_counter();
                if g.date == reserved_on {
                    g.count = g.count.saturating_sub(1);
                    let _ = save_daily_counter(&self.cache_dir, &g);
                }
                return Err(reason);
            }
        };
        if let Err(e) = write_cache_file(&self.cache_dir, &key, &fresh) {
            tracing::warn!(target: "semantic", error = %e, "semantic cache write failed");
        }
        Ok(fresh)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

fn cache_key(batch: &SemanticBatch) -> String {
    let body = serde_json::to_vec(batch).unwrap_or_default();
    let digest = Sha256::digest(&body);
    digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<String> {
    fs::read_to_string(cache_path(dir, key)).ok()
}

fn write_atomic(path: &Path, body: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)?;
    fs::rename(tmp, path)
}

fn write_cache_file(dir: &Path, key: &str, body: &str) -> io::Result<()> {
    write_atomic(&cache_path(dir, key), body.as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }
    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    chrono::Utc::now().date_naive().to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let s = serde_json::to_vec(dc).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_atomic(&counter_path(dir), &s)
}
