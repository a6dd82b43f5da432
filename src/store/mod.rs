// src/store/mod.rs
//! Key-value persistence.
//!
//! The pipeline depends on one primitive: [`KeyValueStore`] (`upsert`, `get`,
//! `scan_prefix`, `delete`) over JSON values, keyed per [`Table`]. Uniqueness
//! is by `(table, key)`, so an upsert at an existing key overwrites.
//!
//! Key layout:
//! - events:   `<source>:<event_id>`
//! - impacts:  `<provider>:<subject_id>:<event_id>`
//! - job_runs: `<provider>:<subject_id>`, plus [`PIPELINE_JOB_KEY`]

pub mod file;
pub mod memory;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analyze::impact::ImpactRecord;
use crate::config::{StoreBackend, StoreConfig};
use crate::ingest::types::{EventSource, RawEvent};

pub use crate::store::file::FileStore;
pub use crate::store::memory::MemoryStore;
pub use crate::store::sqlite::SqliteStore;

/// Run-state row written after every pipeline run.
pub const PIPELINE_JOB_KEY: &str = "pipeline:all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Events,
    Impacts,
    JobRuns,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Events, Table::Impacts, Table::JobRuns];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Events => "events",
            Table::Impacts => "impacts",
            Table::JobRuns => "job_runs",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("record (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt store data in {location}: {reason}")]
    Corrupt { location: String, reason: String },
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn upsert(&self, table: Table, key: &str, record: Value) -> Result<(), StoreError>;

    async fn get(&self, table: Table, key: &str) -> Result<Option<Value>, StoreError>;

    /// All rows whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, table: Table, prefix: &str)
        -> Result<Vec<(String, Value)>, StoreError>;

    /// Returns whether a row was removed.
    async fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError>;

    fn backend_name(&self) -> &'static str;
}

pub type DynStore = Arc<dyn KeyValueStore>;

/// Build the configured backend. `path` is ignored for the memory store.
pub fn open_store(cfg: &StoreConfig) -> Result<DynStore, StoreError> {
    let store: DynStore = match cfg.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => Arc::new(FileStore::open(&cfg.path)?),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&cfg.path)?),
    };
    tracing::info!(
        target: "store",
        backend = store.backend_name(),
        path = %cfg.path.display(),
        "store opened"
    );
    Ok(store)
}

// ---- Keys ----

pub fn event_key(source: EventSource, event_id: &str) -> String {
    format!("{source}:{event_id}")
}

pub fn impact_key(provider: EventSource, subject_id: i64, event_id: &str) -> String {
    format!("{provider}:{subject_id}:{event_id}")
}

pub fn job_key(provider: EventSource, subject_id: i64) -> String {
    format!("{provider}:{subject_id}")
}

// ---- Job run state ----

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRunState {
    pub job_key: String,
    pub last_ran_at_ms: Option<i64>,
    pub last_status: JobStatus,
    #[serde(default)]
    pub last_message: String,
}

impl JobRunState {
    pub fn idle(job_key: impl Into<String>) -> Self {
        Self {
            job_key: job_key.into(),
            last_ran_at_ms: None,
            last_status: JobStatus::Idle,
            last_message: String::new(),
        }
    }
}

// ---- Typed helpers ----

fn decode<T: DeserializeOwned>(table: Table, key: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Corrupt {
        location: format!("{}/{key}", table.as_str()),
        reason: e.to_string(),
    })
}

pub async fn put_event(store: &dyn KeyValueStore, event: &RawEvent) -> Result<(), StoreError> {
    let key = event_key(event.source, &event.id);
    store
        .upsert(Table::Events, &key, serde_json::to_value(event)?)
        .await
}

pub async fn get_event(
    store: &dyn KeyValueStore,
    source: EventSource,
    event_id: &str,
) -> Result<Option<RawEvent>, StoreError> {
    let key = event_key(source, event_id);
    match store.get(Table::Events, &key).await? {
        Some(v) => decode(Table::Events, &key, v).map(Some),
        None => Ok(None),
    }
}

pub async fn put_impact(store: &dyn KeyValueStore, rec: &ImpactRecord) -> Result<(), StoreError> {
    store
        .upsert(Table::Impacts, &rec.key(), serde_json::to_value(rec)?)
        .await
}

pub async fn get_impact(
    store: &dyn KeyValueStore,
    provider: EventSource,
    subject_id: i64,
    event_id: &str,
) -> Result<Option<ImpactRecord>, StoreError> {
    let key = impact_key(provider, subject_id, event_id);
    match store.get(Table::Impacts, &key).await? {
        Some(v) => decode(Table::Impacts, &key, v).map(Some),
        None => Ok(None),
    }
}

/// Every stored impact for one subject, across providers.
pub async fn impacts_for_subject(
    store: &dyn KeyValueStore,
    subject_id: i64,
) -> Result<Vec<ImpactRecord>, StoreError> {
    let mut out = Vec::new();
    for provider in EventSource::ALL {
        let prefix = format!("{provider}:{subject_id}:");
        for (key, value) in store.scan_prefix(Table::Impacts, &prefix).await? {
            out.push(decode(Table::Impacts, &key, value)?);
        }
    }
    Ok(out)
}

pub async fn get_job_state(
    store: &dyn KeyValueStore,
    job_key: &str,
) -> Result<Option<JobRunState>, StoreError> {
    match store.get(Table::JobRuns, job_key).await? {
        Some(v) => decode(Table::JobRuns, job_key, v).map(Some),
        None => Ok(None),
    }
}

pub async fn put_job_state(store: &dyn KeyValueStore, state: &JobRunState) -> Result<(), StoreError> {
    store
        .upsert(Table::JobRuns, &state.job_key, serde_json::to_value(state)?)
        .await
}

/// Delete impact records whose event time is older than `cutoff_ms`.
/// Returns the number removed.
pub async fn trim_impacts_older_than(
    store: &dyn KeyValueStore,
    cutoff_ms: i64,
) -> Result<usize, StoreError> {
    #[derive(Deserialize)]
    struct EventTime {
        event_time_ms: i64,
    }

    let mut removed = 0usize;
    for (key, value) in store.scan_prefix(Table::Impacts, "").await? {
        let t: EventTime = decode(Table::Impacts, &key, value)?;
        if t.event_time_ms < cutoff_ms && store.delete(Table::Impacts, &key).await? {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(target: "store", removed, cutoff_ms, "impact retention trimmed");
    }
    Ok(removed)
}
