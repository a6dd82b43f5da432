// src/store/sqlite.rs
//! SQLite backend: a single `kv` table with a composite primary key.
//!
//! Writes use `INSERT .. ON CONFLICT(tbl, key) DO UPDATE`, which gives the
//! same overwrite-at-key semantics as the other backends.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::store::{KeyValueStore, StoreError, Table};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
    tbl        TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
    PRIMARY KEY (tbl, key)
);
";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path`; `":memory:"` opens an
    /// in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let conn = Connection::open(path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn
        };
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn parse_value(table: Table, key: &str, raw: &str) -> Result<Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        location: format!("sqlite kv {}/{key}", table.as_str()),
        reason: e.to_string(),
    })
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn upsert(&self, table: Table, key: &str, record: Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(&record)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO kv (tbl, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(tbl, key) DO UPDATE SET
                value = excluded.value,
                updated_at = strftime('%s','now')",
            params![table.as_str(), key, body],
        )?;
        Ok(())
    }

    async fn get(&self, table: Table, key: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> = {
            let conn = self.lock();
            conn.query_row(
                "SELECT value FROM kv WHERE tbl = ?1 AND key = ?2",
                params![table.as_str(), key],
                |row| row.get(0),
            )
            .optional()?
        };
        raw.map(|r| parse_value(table, key, &r)).transpose()
    }

    async fn scan_prefix(
        &self,
        table: Table,
        prefix: &str,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let rows: Vec<(String, String)> = {
            let conn = self.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT key, value FROM kv
                 WHERE tbl = ?1 AND substr(key, 1, length(?2)) = ?2
                 ORDER BY key",
            )?;
            let mapped = stmt.query_map(params![table.as_str(), prefix], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            mapped.collect::<Result<_, _>>()?
        };
        rows.into_iter()
            .map(|(k, raw)| {
                let v = parse_value(table, &k, &raw)?;
                Ok((k, v))
            })
            .collect()
    }

    async fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let n = conn.execute(
            "DELETE FROM kv WHERE tbl = ?1 AND key = ?2",
            params![table.as_str(), key],
        )?;
        Ok(n > 0)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_is_unique_per_table_and_key() {
        let s = SqliteStore::open(":memory:").unwrap();
        s.upsert(Table::Impacts, "patch_notes:1:e", json!({"r": 1.0}))
            .await
            .unwrap();
        s.upsert(Table::Impacts, "patch_notes:1:e", json!({"r": 2.0}))
            .await
            .unwrap();
        s.upsert(Table::Events, "patch_notes:1:e", json!({"other": true}))
            .await
            .unwrap();

        let rows = s.scan_prefix(Table::Impacts, "patch_notes:1:").await.unwrap();
        assert_eq!(rows, vec![("patch_notes:1:e".to_string(), json!({"r": 2.0}))]);
        // `_` in the prefix must match literally.
        assert!(s.scan_prefix(Table::Impacts, "patchXnotes").await.unwrap().is_empty());
    }
}
