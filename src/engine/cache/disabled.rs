use anyhow::Result;

use super::Cache;
use crate::types::CachedValue;

/// Caching turned off: every lookup misses and writes are dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledCache;

impl Cache for DisabledCache {
    fn get(&self, _key: &str) -> Result<Option<CachedValue>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &CachedValue, _ttl_secs: u64) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}
