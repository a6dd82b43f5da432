// src/store/file.rs
//! Flat-file backend: one JSON object per table (`<dir>/<table>.json`).
//!
//! The whole table is kept in memory and rewritten on every mutation via
//! write-to-tmp + rename, so a crash never leaves a half-written file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::store::{KeyValueStore, StoreError, Table};

type Rows = BTreeMap<String, Value>;

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    tables: Mutex<HashMap<Table, Rows>>,
}

impl FileStore {
    /// Create `dir` if needed and load any existing table files.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut tables = HashMap::new();
        for table in Table::ALL {
            let path = table_path(&dir, table);
            let rows = match std::fs::read_to_string(&path) {
                Ok(body) if body.trim().is_empty() => Rows::new(),
                Ok(body) => serde_json::from_str::<Rows>(&body).map_err(|e| {
                    StoreError::Corrupt {
                        location: path.display().to_string(),
                        reason: e.to_string(),
                    }
                })?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Rows::new(),
                Err(source) => return Err(StoreError::Io { path, source }),
            };
            tables.insert(table, rows);
        }

        Ok(Self {
            dir,
            tables: Mutex::new(tables),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn persist(&self, table: Table, rows: &Rows) -> Result<(), StoreError> {
        let path = table_path(&self.dir, table);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(rows)?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }
}

fn table_path(dir: &Path, table: Table) -> PathBuf {
    dir.join(format!("{}.json", table.as_str()))
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn upsert(&self, table: Table, key: &str, record: Value) -> Result<(), StoreError> {
        // Held across the write so files are rewritten in mutation order.
        let mut guard = self.tables.lock().await;
        let rows = guard.entry(table).or_default();
        let previous = rows.insert(key.to_string(), record);
        if let Err(e) = self.persist(table, rows).await {
            // Keep memory consistent with disk.
            match previous {
                Some(old) => rows.insert(key.to_string(), old),
                None => rows.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, table: Table, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .get(&table)
            .and_then(|rows| rows.get(key).cloned()))
    }

    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let guard = self.tables.lock().await;
        Ok(guard
            .get(&table)
            .map(|rows| {
                rows.range(prefix.to_string()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError> {
        let mut guard = self.tables.lock().await;
        let rows = guard.entry(table).or_default();
        let Some(old) = rows.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(table, rows).await {
            rows.insert(key.to_string(), old);
            return Err(e);
        }
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
