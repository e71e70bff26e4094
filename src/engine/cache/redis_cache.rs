use anyhow::{Context, Result};
use std::sync::Mutex;

use super::{Cache, decode_value, encode_value};
use crate::types::CachedValue;

/// Networked store. Values travel as JSON text; expiry is enforced by the server through
/// `SET key value EX ttl`.
pub struct RedisCache {
    client: redis::Client,
    conn: Mutex<Option<redis::Connection>>,
}

impl RedisCache {
    /// Validate `url` and connect. The connection is re-established lazily if it drops.
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("parse REDIS_URL")?;
        let conn = client.get_connection().context("connect to redis")?;
        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    {
        let mut slot = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.client.get_connection().context("connect to redis")?,
        };
        let outcome = f(&mut conn);
        // A broken connection is dropped here; the next call reconnects.
        if !matches!(&outcome, Err(e) if e.is_connection_dropped() || e.is_io_error()) {
            *slot = Some(conn);
        }
        outcome.context("redis command")
    }
}

impl Cache for RedisCache {
    fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        let raw: Option<String> = self.with_conn(|c| redis::cmd("GET").arg(key).query(c))?;
        raw.as_deref().map(decode_value).transpose()
    }

    fn set(&self, key: &str, value: &CachedValue, ttl_secs: u64) -> Result<()> {
        let payload = encode_value(value)?;
        // EX must be positive.
        let ttl = ttl_secs.max(1);
        self.with_conn(|c| {
            redis::cmd("SET")
                .arg(key)
                .arg(&payload)
                .arg("EX")
                .arg(ttl)
                .query::<()>(c)
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
