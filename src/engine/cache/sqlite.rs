use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{Cache, decode_value, encode_value};
use crate::types::CachedValue;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
"#;

const WAL_PRAGMAS: &str = r#"
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 5000;
"#;

/// Persistent local store in a SQLite file. TTL is checked on read; expired rows are deleted
/// when they are next looked up.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl SqliteCache {
    /// Open or create the cache DB at `path` with WAL enabled.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open cache database {}", path.display()))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .context("enable WAL")?;
        conn.execute_batch(WAL_PRAGMAS).context("set WAL pragmas")?;
        conn.execute_batch(SCHEMA).context("create schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory DB with the same schema (no WAL).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        conn.execute_batch(SCHEMA).context("create schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Cache for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT value, expires_at FROM cache WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("read cache row")?;
        match row {
            Some((value, expires_at)) if expires_at > now_secs() => decode_value(&value).map(Some),
            Some(_) => {
                conn.execute("DELETE FROM cache WHERE key = ?1", params![key])
                    .context("delete expired cache row")?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &CachedValue, ttl_secs: u64) -> Result<()> {
        let payload = encode_value(value)?;
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let expires_at = now_secs().saturating_add(ttl);
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO cache (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, payload, expires_at],
        )
        .context("write cache row")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
