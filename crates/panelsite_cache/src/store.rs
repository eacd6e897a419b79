use std::collections::BTreeSet;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::error::CacheError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTask {
    pub task_id: String,
    pub inputs_fingerprint: [u8; 32],
    pub outputs: Vec<String>,
}

pub trait CacheStore {
    fn get(&mut self, task_id: &str) -> Result<Option<CachedTask>, CacheError>;
    fn put(
        &mut self,
        task_id: &str,
        inputs_fingerprint: [u8; 32],
        outputs: &[String],
    ) -> Result<(), CacheError>;
    fn forget(&mut self, task_id: &str) -> Result<(), CacheError>;
    /// Drops every task not in `live`, returning the outputs they recorded.
    fn retain(&mut self, live: &BTreeSet<String>) -> Result<Vec<String>, CacheError>;
}

pub struct SqliteCacheStore {
    conn: Connection,
}

const SCHEMA_VERSION: i64 = 2;

impl SqliteCacheStore {
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened build cache");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta(\
                key TEXT PRIMARY KEY,\
                value INTEGER NOT NULL\
            );",
        )?;
        let version: Option<i64> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(version) = version.filter(|version| *version != SCHEMA_VERSION) {
            warn!(
                found = version,
                expected = SCHEMA_VERSION,
                "cache schema version mismatch, recreating cache"
            );
            conn.execute_batch(
                "DROP TABLE IF EXISTS outputs;\
                DROP TABLE IF EXISTS tasks;\
                DROP TABLE IF EXISTS meta;",
            )?;
        }
        create_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    fn outputs_of(&self, task_id: &str) -> Result<Vec<String>, CacheError> {
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM outputs WHERE task_id = ?1 ORDER BY path")?;
        let rows = stmt.query_map(params![task_id], |row| row.get(0))?;
        let mut outputs = Vec::new();
        for output in rows {
            outputs.push(output?);
        }
        Ok(outputs)
    }
}

fn create_schema(conn: &Connection) -> Result<(), CacheError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta(\
            key TEXT PRIMARY KEY,\
            value INTEGER NOT NULL\
        );\
        CREATE TABLE IF NOT EXISTS tasks(\
            task_id TEXT PRIMARY KEY,\
            inputs_hash BLOB NOT NULL,\
            updated_utc INTEGER NULL\
        );\
        CREATE TABLE IF NOT EXISTS outputs(\
            task_id TEXT NOT NULL,\
            path TEXT NOT NULL,\
            PRIMARY KEY(task_id, path),\
            FOREIGN KEY(task_id) REFERENCES tasks(task_id) ON DELETE CASCADE\
        );",
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION],
    )?;
    Ok(())
}

impl CacheStore for SqliteCacheStore {
    fn get(&mut self, task_id: &str) -> Result<Option<CachedTask>, CacheError> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT inputs_hash FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(blob) = blob else {
            return Ok(None);
        };
        let inputs_fingerprint: [u8; 32] =
            blob.as_slice()
                .try_into()
                .map_err(|_| CacheError::CorruptFingerprint {
                    task_id: task_id.to_string(),
                    len: blob.len(),
                })?;
        Ok(Some(CachedTask {
            task_id: task_id.to_string(),
            inputs_fingerprint,
            outputs: self.outputs_of(task_id)?,
        }))
    }

    fn put(
        &mut self,
        task_id: &str,
        inputs_fingerprint: [u8; 32],
        outputs: &[String],
    ) -> Result<(), CacheError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO tasks (task_id, inputs_hash, updated_utc)\n\
                VALUES (?1, ?2, ?3)\n\
                ON CONFLICT(task_id) DO UPDATE SET\n\
                    inputs_hash = excluded.inputs_hash,\n\
                    updated_utc = excluded.updated_utc",
            params![task_id, inputs_fingerprint.to_vec(), now],
        )?;
        tx.execute("DELETE FROM outputs WHERE task_id = ?1", params![task_id])?;
        {
            let mut stmt = tx.prepare("INSERT INTO outputs (task_id, path) VALUES (?1, ?2)")?;
            for output in outputs {
                stmt.execute(params![task_id, output])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn forget(&mut self, task_id: &str) -> Result<(), CacheError> {
        self.conn
            .execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])?;
        Ok(())
    }

    fn retain(&mut self, live: &BTreeSet<String>) -> Result<Vec<String>, CacheError> {
        let known: Vec<String> = {
            let mut stmt = self.conn.prepare("SELECT task_id FROM tasks ORDER BY task_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        let mut dropped_outputs = Vec::new();
        for task_id in known.iter().filter(|task_id| !live.contains(*task_id)) {
            dropped_outputs.extend(self.outputs_of(task_id)?);
            self.forget(task_id)?;
        }
        if !dropped_outputs.is_empty() {
            debug!(count = dropped_outputs.len(), "dropped stale cache entries");
        }
        Ok(dropped_outputs)
    }
}
