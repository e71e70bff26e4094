//! Tagged error type for the analysis pipeline.
//!
//! Only validation failures (fresh or replayed from the cache) and [`AnalysisError::Cancelled`]
//! shape the response; every other variant collapses into a generic failure carrying its message.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Malformed input or a disallowed destination. Never retried.
    #[error("{0}")]
    Validation(String),

    /// A failure remembered by the cache for this source; replayed without new work.
    #[error("{0}")]
    CachedFailure(String),

    /// The request deadline elapsed and the shared cancellation signal tripped.
    #[error("Analysis timed out after {timeout_secs} seconds")]
    Cancelled { timeout_secs: u64 },

    /// Fetch failed for a reason other than cancellation (unreachable host, bad status, bad archive).
    #[error("{0}")]
    Transfer(String),

    /// Filesystem failure that survived the retry policy.
    #[error("Failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Anything else (cache backend, configuration).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AnalysisError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// HTTP-style status for this failure.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::CachedFailure(_) => 400,
            Self::Cancelled { .. } => 408,
            _ => 500,
        }
    }
}
