//! Repolines: remote repository line counter with bounded traversal and adaptive caching.

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use error::AnalysisError;
pub use types::*;

use std::path::Path;

/// Result alias used by the public repolines API
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Single entry point: analyze `repo_url` with settings from `config`, caching per its backend.
///
/// Builds a fresh [`Analyzer`](crate::engine::Analyzer) each call, so an in-process cache only
/// lives for this call. Long-running callers should build one `Analyzer` and reuse it.
pub fn analyze_repo(repo_url: &str, config: utils::Config) -> anyhow::Result<Response> {
    let analyzer = engine::Analyzer::from_config(config)?;
    Ok(analyzer.analyze(repo_url))
}

/// Count lines per language under a local directory, using the same traversal as remote
/// analysis (limiter, retry, `.git` skipped), bounded by `config.analysis_timeout`.
pub fn analyze_dir(root: &Path, config: &utils::Config) -> Result<AnalysisResult> {
    let cancel = pipeline::CancellationToken::with_timeout(config.analysis_timeout);
    let _timer = pipeline::DeadlineTimer::start(&cancel);
    let limiter = std::sync::Arc::new(pipeline::ConcurrencyLimiter::new(
        utils::limiter_capacity(config.fs_concurrency),
    ));
    let fs = pipeline::RequestFs::new(
        std::sync::Arc::new(pipeline::StdFs),
        limiter,
        cancel,
        pipeline::RetryPolicy::default(),
    );
    pipeline::traverse(root, &fs)
}
