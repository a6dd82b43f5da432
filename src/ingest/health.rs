//! Per-source health counters.
//!
//! Passed by reference into every fetch instead of living in module state,
//! so tests and long-running schedulers control the lifecycle (`reset`).

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::ingest::types::{EventSource, SourceStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceHealthEntry {
    pub ok_count: u64,
    pub error_count: u64,
    pub last_item_count: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct SourceHealth {
    inner: Mutex<BTreeMap<EventSource, SourceHealthEntry>>,
}

impl SourceHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, status: &SourceStatus) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let entry = map.entry(status.source).or_default();
        if status.ok {
            entry.ok_count += 1;
            entry.last_item_count = status.item_count;
        } else {
            entry.error_count += 1;
            entry.last_item_count = 0;
            entry.last_error = status.error.clone();
        }
    }

    pub fn snapshot(&self) -> BTreeMap<EventSource, SourceHealthEntry> {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn reset(&self) {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }
}
