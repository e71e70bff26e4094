use anyhow::Result;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::Cache;
use crate::types::CachedValue;

struct Slot {
    value: CachedValue,
    expires_at: Instant,
}

/// Bounded in-process store: least-recently-used eviction at `capacity` entries, TTL checked on
/// read (an expired entry is removed and reported as absent).
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Slot>>,
}

impl MemoryCache {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            None => return Ok(None),
            Some(slot) if slot.expires_at > Instant::now() => return Ok(Some(slot.value.clone())),
            Some(_) => {}
        }
        entries.pop(key);
        Ok(None)
    }

    fn set(&self, key: &str, value: &CachedValue, ttl_secs: u64) -> Result<()> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(Duration::from_secs(ttl_secs))
            .unwrap_or(now + Duration::from_secs(u32::MAX as u64));
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(
            key.to_string(),
            Slot {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
