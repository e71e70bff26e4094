//! Application configuration: runtime settings plus tuning constants in one place.
//!
//! Settings resolve in layers: defaults → optional TOML file → environment (after `.env`) → CLI.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---- Defaults ----

/// Defaults for every runtime setting.
pub struct Defaults;

impl Defaults {
    pub const ALLOWED_HOSTS: [&'static str; 3] = ["github.com", "gitlab.com", "bitbucket.org"];
    /// One day.
    pub const MIN_CACHE_TTL_SECS: u64 = 86_400;
    /// Seconds of TTL per transferred byte.
    pub const CACHE_TTL_FACTOR: f64 = 0.01;
    pub const ANALYSIS_TIMEOUT_SECS: u64 = 60;
    /// One year.
    pub const TIMEOUT_CACHE_TTL_SECS: u64 = 31_536_000;
    pub const MEMORY_CACHE_CAPACITY: usize = 100;
    pub const FS_CONCURRENCY: usize = 50;
}

// ---- Environment keys ----

pub struct EnvKeys;

impl EnvKeys {
    pub const ALLOWED_HOSTS: &'static str = "ALLOWED_HOSTS";
    pub const MIN_CACHE_TTL: &'static str = "MIN_CACHE_TTL";
    pub const CACHE_TTL_FACTOR: &'static str = "CACHE_TTL_FACTOR";
    pub const ANALYSIS_TIMEOUT: &'static str = "ANALYSIS_TIMEOUT";
    pub const TIMEOUT_CACHE_TTL: &'static str = "TIMEOUT_CACHE_TTL";
    pub const DISABLE_CACHE: &'static str = "DISABLE_CACHE";
    pub const REDIS_URL: &'static str = "REDIS_URL";
    pub const CACHE_DB_PATH: &'static str = "CACHE_DB_PATH";
    pub const MEMORY_CACHE_CAPACITY: &'static str = "MEMORY_CACHE_CAPACITY";
    pub const FS_CONCURRENCY: &'static str = "FS_CONCURRENCY";
}

// ---- Retry ----

/// Backoff for filesystem calls that hit descriptor exhaustion.
pub struct RetryConsts;

impl RetryConsts {
    pub const MAX_RETRIES: u32 = 10;
    pub const BASE_DELAY: Duration = Duration::from_millis(100);
}

// ---- Traversal ----

pub struct WalkConsts;

impl WalkConsts {
    /// Version-control bookkeeping directory, never descended into.
    pub const METADATA_DIR: &'static str = ".git";
    /// How often a limiter waiter re-checks cancellation.
    pub const PERMIT_POLL: Duration = Duration::from_millis(50);
}

// ---- Cache ----

pub struct CacheConsts;

impl CacheConsts {
    pub const KEY_PREFIX: &'static str = "repo:";
}

/// Cache key for a repository URL as given.
pub fn cache_key(raw_url: &str) -> String {
    format!("{}{}", CacheConsts::KEY_PREFIX, raw_url)
}

// ---- Runtime settings ----

/// Which cache backend to build.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheBackend {
    Disabled,
    Redis(String),
    Sqlite(PathBuf),
    Memory { capacity: usize },
}

/// Resolved runtime settings.
#[derive(Clone, Debug)]
pub struct Config {
    pub allowed_hosts: Vec<String>,
    pub min_cache_ttl_secs: u64,
    pub cache_ttl_factor: f64,
    pub analysis_timeout: Duration,
    pub timeout_cache_ttl_secs: u64,
    pub disable_cache: bool,
    pub redis_url: Option<String>,
    pub cache_db_path: Option<PathBuf>,
    pub memory_cache_capacity: usize,
    pub fs_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allowed_hosts: Defaults::ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
            min_cache_ttl_secs: Defaults::MIN_CACHE_TTL_SECS,
            cache_ttl_factor: Defaults::CACHE_TTL_FACTOR,
            analysis_timeout: Duration::from_secs(Defaults::ANALYSIS_TIMEOUT_SECS),
            timeout_cache_ttl_secs: Defaults::TIMEOUT_CACHE_TTL_SECS,
            disable_cache: false,
            redis_url: None,
            cache_db_path: None,
            memory_cache_capacity: Defaults::MEMORY_CACHE_CAPACITY,
            fs_concurrency: Defaults::FS_CONCURRENCY,
        }
    }
}

impl Config {
    /// Defaults, then `file` (if given), then `.env` + process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = file {
            let parsed = load_config_toml(path)?;
            apply_file_to_config(&parsed, &mut config);
        }
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay settings from a key lookup (the process environment in [`Config::load`]).
    /// Unset or blank keys leave the current value alone.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(v) = get(EnvKeys::ALLOWED_HOSTS) {
            self.allowed_hosts = parse_host_list(&v);
        }
        if let Some(v) = get(EnvKeys::MIN_CACHE_TTL) {
            self.min_cache_ttl_secs = parse_env(EnvKeys::MIN_CACHE_TTL, &v)?;
        }
        if let Some(v) = get(EnvKeys::CACHE_TTL_FACTOR) {
            self.cache_ttl_factor = parse_env(EnvKeys::CACHE_TTL_FACTOR, &v)?;
        }
        if let Some(v) = get(EnvKeys::ANALYSIS_TIMEOUT) {
            self.analysis_timeout = Duration::from_secs(parse_env(EnvKeys::ANALYSIS_TIMEOUT, &v)?);
        }
        if let Some(v) = get(EnvKeys::TIMEOUT_CACHE_TTL) {
            self.timeout_cache_ttl_secs = parse_env(EnvKeys::TIMEOUT_CACHE_TTL, &v)?;
        }
        if let Some(v) = get(EnvKeys::DISABLE_CACHE) {
            self.disable_cache = parse_flag(&v);
        }
        if let Some(v) = get(EnvKeys::REDIS_URL) {
            self.redis_url = Some(v);
        }
        if let Some(v) = get(EnvKeys::CACHE_DB_PATH) {
            self.cache_db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get(EnvKeys::MEMORY_CACHE_CAPACITY) {
            self.memory_cache_capacity = parse_env(EnvKeys::MEMORY_CACHE_CAPACITY, &v)?;
        }
        if let Some(v) = get(EnvKeys::FS_CONCURRENCY) {
            self.fs_concurrency = parse_env(EnvKeys::FS_CONCURRENCY, &v)?;
        }
        Ok(())
    }

    /// Backend selection: disabled flag, then Redis, then SQLite, then in-process LRU.
    pub fn cache_backend(&self) -> CacheBackend {
        if self.disable_cache {
            CacheBackend::Disabled
        } else if let Some(url) = &self.redis_url {
            CacheBackend::Redis(url.clone())
        } else if let Some(path) = &self.cache_db_path {
            CacheBackend::Sqlite(path.clone())
        } else {
            CacheBackend::Memory {
                capacity: self.memory_cache_capacity,
            }
        }
    }

    /// `max(min_cache_ttl, ceil(bytes * factor))`.
    pub fn success_ttl_secs(&self, bytes_transferred: u64) -> u64 {
        let scaled = (bytes_transferred as f64 * self.cache_ttl_factor).ceil();
        let scaled = if scaled.is_finite() && scaled > 0.0 {
            scaled.min(u64::MAX as f64) as u64
        } else {
            0
        };
        scaled.max(self.min_cache_ttl_secs)
    }
}

fn parse_host_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

fn parse_flag(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_env<T>(key: &str, v: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    v.parse::<T>()
        .with_context(|| format!("invalid value for {key}: {v:?}"))
}

// ---- Config file ----

#[derive(Debug, Deserialize)]
pub(crate) struct ConfigToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    allowed_hosts: Option<Vec<String>>,
    min_cache_ttl: Option<u64>,
    cache_ttl_factor: Option<f64>,
    analysis_timeout: Option<u64>,
    timeout_cache_ttl: Option<u64>,
    disable_cache: Option<bool>,
    redis_url: Option<String>,
    cache_db_path: Option<String>,
    memory_cache_capacity: Option<usize>,
    fs_concurrency: Option<usize>,
}

pub(crate) fn load_config_toml(path: &Path) -> Result<ConfigToml> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read config file {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parse config file {}", path.display()))
}

/// Overwrite config field from file when present.
macro_rules! apply_file_opt {
    ($file:expr, $config:expr, $file_field:ident => $config_field:ident) => {
        if let Some(v) = $file.$file_field.clone() {
            $config.$config_field = v;
        }
    };
}

pub(crate) fn apply_file_to_config(file: &ConfigToml, config: &mut Config) {
    let s = &file.settings;
    if let Some(ref hosts) = s.allowed_hosts {
        config.allowed_hosts = hosts.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
    }
    apply_file_opt!(s, config, min_cache_ttl => min_cache_ttl_secs);
    apply_file_opt!(s, config, cache_ttl_factor => cache_ttl_factor);
    if let Some(secs) = s.analysis_timeout {
        config.analysis_timeout = Duration::from_secs(secs);
    }
    apply_file_opt!(s, config, timeout_cache_ttl => timeout_cache_ttl_secs);
    apply_file_opt!(s, config, disable_cache => disable_cache);
    if let Some(ref url) = s.redis_url {
        config.redis_url = Some(url.clone());
    }
    if let Some(ref p) = s.cache_db_path {
        config.cache_db_path = Some(PathBuf::from(p));
    }
    apply_file_opt!(s, config, memory_cache_capacity => memory_cache_capacity);
    apply_file_opt!(s, config, fs_concurrency => fs_concurrency);
}
