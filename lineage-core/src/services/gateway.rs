//! services/gateway.rs
//!
//! Durable key/value store the history and position cache write through.
//! One JSON record per key, last write wins, no cross-key transactions.
//!
//! Backends:
//! - `MemoryGateway`: process-local map.
//! - `FileGateway`: one `<key>.json` per record, written via temp file + rename.
//! - `SqliteGateway`: single `records` table in WAL mode, upsert per key.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::{StorageBackend, StorageConfig};
use crate::utils::path::sanitize_key;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("record {key} is not valid JSON: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub trait PersistenceGateway: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, GatewayError>;
    fn put(&self, key: &str, value: &Value) -> Result<(), GatewayError>;
    fn remove(&self, key: &str) -> Result<(), GatewayError>;
}

/// Build the backend named in config.
pub fn open_gateway(cfg: &StorageConfig) -> anyhow::Result<Arc<dyn PersistenceGateway>> {
    let gw: Arc<dyn PersistenceGateway> = match cfg.backend {
        StorageBackend::Sqlite => Arc::new(SqliteGateway::open(&cfg.db_path)?),
        StorageBackend::File => Arc::new(FileGateway::open(&cfg.records_dir)?),
        StorageBackend::Memory => Arc::new(MemoryGateway::new()),
    };
    tracing::info!(backend = cfg.backend.as_str(), "persistence gateway ready");
    Ok(gw)
}

// ---------- memory ----------

#[derive(Debug, Default)]
pub struct MemoryGateway {
    records: Mutex<HashMap<String, Value>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistenceGateway for MemoryGateway {
    fn get(&self, key: &str) -> Result<Option<Value>, GatewayError> {
        let map = self
            .records
            .lock()
            .map_err(|_| GatewayError::Unavailable("memory store poisoned".into()))?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, value: &Value) -> Result<(), GatewayError> {
        let mut map = self
            .records
            .lock()
            .map_err(|_| GatewayError::Unavailable("memory store poisoned".into()))?;
        map.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), GatewayError> {
        let mut map = self
            .records
            .lock()
            .map_err(|_| GatewayError::Unavailable("memory store poisoned".into()))?;
        map.remove(key);
        Ok(())
    }
}

// ---------- file ----------

/// Root is typically `.lineage/records`.
pub struct FileGateway {
    dir: PathBuf,
}

impl FileGateway {
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

impl PersistenceGateway for FileGateway {
    fn get(&self, key: &str) -> Result<Option<Value>, GatewayError> {
        let p = self.path_for(key);
        if !p.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&p)?;
        let v = serde_json::from_slice(&bytes).map_err(|source| GatewayError::Encode {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(v))
    }

    fn put(&self, key: &str, value: &Value) -> Result<(), GatewayError> {
        let bytes = serde_json::to_vec(value).map_err(|source| GatewayError::Encode {
            key: key.to_string(),
            source,
        })?;
        write_atomic(&self.path_for(key), &bytes)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), GatewayError> {
        let p = self.path_for(key);
        match fs::remove_file(&p) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)
}

// ---------- sqlite ----------

/// Single-writer SQLite record store.
pub struct SqliteGateway {
    db: Mutex<Connection>,
}

impl SqliteGateway {
    /// Open/create the DB and ensure schema.
    ///
    /// - Creates the parent directory if missing.
    /// - Enables WAL.
    /// - Creates the `records` table if missing.
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let db = Connection::open(db_path)?;
        db.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS records (
              key         TEXT PRIMARY KEY,  -- e.g. history::orders.csv
              value       TEXT NOT NULL,     -- JSON payload
              updated_at  TEXT NOT NULL      -- RFC3339 UTC
            );
            "#,
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, GatewayError> {
        self.db
            .lock()
            .map_err(|_| GatewayError::Unavailable("sqlite connection poisoned".into()))
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Result<Vec<String>, GatewayError> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT key FROM records ORDER BY key")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

impl PersistenceGateway for SqliteGateway {
    fn get(&self, key: &str) -> Result<Option<Value>, GatewayError> {
        let db = self.conn()?;
        let text: Option<String> = db
            .query_row("SELECT value FROM records WHERE key=?1", [key], |r| r.get(0))
            .optional()?;
        match text {
            Some(t) => serde_json::from_str(&t)
                .map(Some)
                .map_err(|source| GatewayError::Encode {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &Value) -> Result<(), GatewayError> {
        let text = serde_json::to_string(value).map_err(|source| GatewayError::Encode {
            key: key.to_string(),
            source,
        })?;
        let now = Utc::now().to_rfc3339();
        let db = self.conn()?;
        db.execute(
            r#"
            INSERT INTO records(key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
              value      = excluded.value,
              updated_at = excluded.updated_at
            "#,
            (key, &text, &now),
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), GatewayError> {
        let db = self.conn()?;
        db.execute("DELETE FROM records WHERE key=?1", [key])?;
        Ok(())
    }
}
