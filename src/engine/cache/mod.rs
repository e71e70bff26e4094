//! Cache abstraction: key/value with per-entry TTL and interchangeable backends.
//!
//! A miss is `Ok(None)`, never an error. Backend failures (connection refused, corrupt row)
//! propagate to the caller; there is no retry at this layer.

mod disabled;
mod memory;
mod redis_cache;
mod sqlite;

pub use disabled::DisabledCache;
pub use memory::MemoryCache;
pub use redis_cache::RedisCache;
pub use sqlite::SqliteCache;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::types::CachedValue;
use crate::utils::config::{CacheBackend, Config};

pub trait Cache: Send + Sync {
    /// Live value under `key`, or `None` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<CachedValue>>;

    /// Store `value` under `key` for `ttl_secs` seconds, replacing any previous entry.
    fn set(&self, key: &str, value: &CachedValue, ttl_secs: u64) -> Result<()>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Build the backend `config` selects. Called once at startup; the instance is shared by every
/// request.
pub fn build_cache(config: &Config) -> Result<Arc<dyn Cache>> {
    let backend = config.cache_backend();
    let cache: Arc<dyn Cache> = match backend {
        CacheBackend::Disabled => Arc::new(DisabledCache),
        CacheBackend::Redis(ref url) => Arc::new(RedisCache::open(url)?),
        CacheBackend::Sqlite(ref path) => Arc::new(SqliteCache::open(path)?),
        CacheBackend::Memory { capacity } => Arc::new(MemoryCache::new(capacity)),
    };
    log::debug!("Cache backend: {}", cache.name());
    Ok(cache)
}

/// Textual wire format shared by the networked and persistent backends: JSON with field names
/// preserved (`{"stats":{...},"totalLines":N}` or `{"error":"..."}`).
pub fn encode_value(value: &CachedValue) -> Result<String> {
    serde_json::to_string(value).context("serialize cache value")
}

pub fn decode_value(s: &str) -> Result<CachedValue> {
    serde_json::from_str(s).context("deserialize cache value")
}
