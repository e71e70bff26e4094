//! Public types for the repolines API and pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::error::AnalysisError;

/// A validated repository URL: absolute, `http`/`https`, host on the allow-list.
///
/// Only [`RepositorySource::parse`] constructs one, so holding a value means validation passed.
#[derive(Clone, Debug)]
pub struct RepositorySource {
    raw: String,
    url: Url,
}

impl RepositorySource {
    /// Validate raw user input against the scheme rule and `allowed_hosts`. Makes no network call.
    pub fn parse(raw: &str, allowed_hosts: &[String]) -> Result<Self, AnalysisError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AnalysisError::validation("Repository URL is required"));
        }
        let url = Url::parse(raw)
            .map_err(|e| AnalysisError::validation(format!("Invalid repository URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AnalysisError::validation(format!(
                "Unsupported URL scheme '{}': only http and https are allowed",
                url.scheme()
            )));
        }
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if !allowed_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)) {
            return Err(AnalysisError::validation(format!(
                "Host '{}' is not allowed. Allowed hosts: {}",
                host,
                allowed_hosts.join(", ")
            )));
        }
        Ok(Self {
            raw: raw.to_string(),
            url,
        })
    }

    /// The URL exactly as given (trimmed). Used for the cache key.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Lowercased hostname.
    pub fn host(&self) -> String {
        self.url.host_str().unwrap_or_default().to_ascii_lowercase()
    }

    /// Path segments with empty segments and a trailing `.git` removed (`owner/repo`).
    pub fn repo_path(&self) -> Vec<String> {
        let mut segments: Vec<String> = self
            .url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        if let Some(last) = segments.last_mut()
            && let Some(stripped) = last.strip_suffix(".git")
        {
            *last = stripped.to_string();
        }
        segments
    }
}

impl fmt::Display for RepositorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Per-language line counts for one traversal.
///
/// Invariant: `total_lines == stats.values().sum()`. Build through [`AnalysisResult::from_stats`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub stats: BTreeMap<String, u64>,
    #[serde(rename = "totalLines")]
    pub total_lines: u64,
}

impl AnalysisResult {
    pub fn from_stats(stats: BTreeMap<String, u64>) -> Self {
        let total_lines = stats.values().sum();
        Self { stats, total_lines }
    }

    pub fn is_consistent(&self) -> bool {
        self.total_lines == self.stats.values().sum::<u64>()
    }
}

/// A cached failure (currently only timeouts).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegativeResult {
    pub error: String,
}

/// What a cache entry holds. Told apart by shape: a failure has an `error` field, a success has
/// `stats` and `totalLines`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CachedValue {
    Failure(NegativeResult),
    Success(AnalysisResult),
}

impl From<AnalysisResult> for CachedValue {
    fn from(r: AnalysisResult) -> Self {
        CachedValue::Success(r)
    }
}

impl From<NegativeResult> for CachedValue {
    fn from(r: NegativeResult) -> Self {
        CachedValue::Failure(r)
    }
}

/// Running byte counter for one fetch. Clones share the same counter.
#[derive(Clone, Debug, Default)]
pub struct TransferMetrics {
    bytes: Arc<AtomicU64>,
}

impl TransferMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// HTTP-shaped outcome of one analysis request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// 200 with the result (fresh or cached).
    Ok(AnalysisResult),
    /// 400: validation failure or a cached prior failure.
    BadRequest(String),
    /// 408: deadline elapsed.
    TimedOut(String),
    /// 500: anything else.
    Failed(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl Response {
    pub fn status(&self) -> u16 {
        match self {
            Response::Ok(_) => 200,
            Response::BadRequest(_) => 400,
            Response::TimedOut(_) => 408,
            Response::Failed(_) => 500,
        }
    }

    /// JSON body: the result on success, `{ "error": ... }` otherwise.
    pub fn body(&self) -> serde_json::Value {
        let value = match self {
            Response::Ok(result) => serde_json::to_value(result),
            Response::BadRequest(e) | Response::TimedOut(e) | Response::Failed(e) => {
                serde_json::to_value(ErrorBody { error: e })
            }
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

impl From<AnalysisError> for Response {
    fn from(err: AnalysisError) -> Self {
        match err.status() {
            400 => Response::BadRequest(err.to_string()),
            408 => Response::TimedOut(err.to_string()),
            _ => Response::Failed(err.to_string()),
        }
    }
}
