// src/store/memory.rs
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::store::{KeyValueStore, StoreError, Table};

/// Process-local store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Table, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, table: Table) -> usize {
        self.tables.read().await.get(&table).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn upsert(&self, table: Table, key: &str, record: Value) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .entry(table)
            .or_default()
            .insert(key.to_string(), record);
        Ok(())
    }

    async fn get(&self, table: Table, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .get(&table)
            .and_then(|t| t.get(key).cloned()))
    }

    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let guard = self.tables.read().await;
        let Some(rows) = guard.get(&table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .write()
            .await
            .get_mut(&table)
            .is_some_and(|t| t.remove(key).is_some()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
