//! Analysis orchestrator: validate → cache check → fetch → traverse → cache write → respond.
//!
//! Fetch and traversal share one cancellation token whose deadline starts with the request.
//! The working directory and the deadline timer are scoped guards, so both are released on
//! every exit path, including timeouts and failures.

use std::sync::Arc;

use crate::engine::cache::{Cache, build_cache};
use crate::engine::fetch::{ArchiveFetcher, Fetch};
use crate::error::AnalysisError;
use crate::pipeline::cancel::{CancellationToken, DeadlineTimer};
use crate::pipeline::fs::{FileOps, RequestFs, StdFs};
use crate::pipeline::limiter::ConcurrencyLimiter;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::walk::traverse;
use crate::types::{
    AnalysisResult, CachedValue, NegativeResult, RepositorySource, Response, TransferMetrics,
};
use crate::utils::config::{Config, cache_key};
use crate::utils::fd_limit::limiter_capacity;
use crate::utils::tempfiles::WorkDir;

/// Long-lived coordinator. Construct once at startup and share across requests; it holds the
/// cache, the fetcher and the process-wide filesystem limiter.
pub struct Analyzer {
    config: Config,
    cache: Arc<dyn Cache>,
    fetcher: Arc<dyn Fetch>,
    file_ops: Arc<dyn FileOps>,
    limiter: Arc<ConcurrencyLimiter>,
    retry: RetryPolicy,
}

impl Analyzer {
    pub fn new(config: Config, cache: Arc<dyn Cache>, fetcher: Arc<dyn Fetch>) -> Self {
        let limiter = Arc::new(ConcurrencyLimiter::new(limiter_capacity(
            config.fs_concurrency,
        )));
        Self {
            config,
            cache,
            fetcher,
            file_ops: Arc::new(StdFs),
            limiter,
            retry: RetryPolicy::default(),
        }
    }

    /// Cache backend from `config` and the HTTP archive fetcher.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let cache = build_cache(&config)?;
        let fetcher = Arc::new(ArchiveFetcher::new()?);
        Ok(Self::new(config, cache, fetcher))
    }

    /// Replace the base file operations (tests inject failures here).
    pub fn with_file_ops(mut self, file_ops: Arc<dyn FileOps>) -> Self {
        self.file_ops = file_ops;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one request and shape the outcome as a response.
    pub fn analyze(&self, raw_url: &str) -> Response {
        match self.run(raw_url) {
            Ok(result) => Response::Ok(result),
            Err(e) => {
                match e.status() {
                    500 => log::error!("Analysis of {} failed: {}", raw_url.trim(), e),
                    _ => log::info!("Analysis of {} rejected: {}", raw_url.trim(), e),
                }
                Response::from(e)
            }
        }
    }

    /// The request state machine, returning the tagged error on any exit other than success.
    pub fn run(&self, raw_url: &str) -> Result<AnalysisResult, AnalysisError> {
        let cancel = CancellationToken::with_timeout(self.config.analysis_timeout);

        let source = RepositorySource::parse(raw_url, &self.config.allowed_hosts)?;
        let key = cache_key(source.as_str());

        match self.cache.get(&key)? {
            Some(CachedValue::Success(result)) => {
                log::info!("Cache hit for {}", source);
                return Ok(result);
            }
            Some(CachedValue::Failure(failure)) => {
                log::info!("Cache hit (failure) for {}", source);
                return Err(AnalysisError::CachedFailure(failure.error));
            }
            None => log::debug!("Cache miss for {}", source),
        }

        let metrics = TransferMetrics::new();
        match self.fetch_and_traverse(&source, &cancel, &metrics) {
            Ok((result, bytes)) => {
                let ttl = self.config.success_ttl_secs(bytes);
                log::info!(
                    "Analyzed {}: {} lines, {} bytes fetched, cached for {}s",
                    source,
                    result.total_lines,
                    bytes,
                    ttl
                );
                self.cache
                    .set(&key, &CachedValue::Success(result.clone()), ttl)?;
                Ok(result)
            }
            Err(e) if e.is_cancelled() => {
                let failure = NegativeResult {
                    error: e.to_string(),
                };
                log::warn!(
                    "{} for {} ({} bytes fetched); caching failure for {}s",
                    e,
                    source,
                    metrics.bytes_transferred(),
                    self.config.timeout_cache_ttl_secs
                );
                if let Err(cache_err) = self.cache.set(
                    &key,
                    &CachedValue::Failure(failure),
                    self.config.timeout_cache_ttl_secs,
                ) {
                    log::warn!("Failed to cache timeout for {}: {:#}", source, cache_err);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetching + Traversing, bounded by the deadline. Returns the counts and the byte count the
    /// fetch reported. Timer and working directory are released when this returns.
    fn fetch_and_traverse(
        &self,
        source: &RepositorySource,
        cancel: &CancellationToken,
        metrics: &TransferMetrics,
    ) -> Result<(AnalysisResult, u64), AnalysisError> {
        let _timer = DeadlineTimer::start(cancel);
        let workdir = WorkDir::create()?;
        let fs = RequestFs::new(
            Arc::clone(&self.file_ops),
            Arc::clone(&self.limiter),
            cancel.clone(),
            self.retry,
        );
        let bytes = self.fetcher.fetch(source, workdir.path(), &fs, metrics)?;
        let counted = metrics.bytes_transferred();
        if bytes != counted {
            log::debug!(
                "Fetch of {} reported {} bytes, counter saw {}; using the reported value",
                source,
                bytes,
                counted
            );
        }
        let result = traverse(workdir.path(), &fs)?;
        Ok((result, bytes))
    }
}
