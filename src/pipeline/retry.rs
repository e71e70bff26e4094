//! Exponential backoff for filesystem calls that hit descriptor exhaustion.

use std::io;
use std::time::Duration;

use crate::error::AnalysisError;
use crate::pipeline::cancel::CancellationToken;
use crate::utils::config::RetryConsts;
use crate::utils::fd_limit::is_descriptor_exhaustion;

/// How many times to retry a transient failure and how long to wait before each retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: RetryConsts::MAX_RETRIES,
            base_delay: RetryConsts::BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base_delay * 2^(retry-1)`.
    ///
    /// With the default 100 ms base: 100, 200, 400, ... 51_200 ms for retry 10.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(retry - 1);
        self.base_delay.saturating_mul(multiplier)
    }

    /// Run `op`, retrying while it fails with descriptor exhaustion and retries remain.
    ///
    /// A tripped `cancel` short-circuits before the first attempt, between attempts, and during a
    /// backoff sleep. Any other error is returned as is on the first occurrence.
    pub fn run<T, F>(&self, cancel: &CancellationToken, mut op: F) -> Result<io::Result<T>, AnalysisError>
    where
        F: FnMut() -> io::Result<T>,
    {
        let mut retry = 0;
        loop {
            cancel.check()?;
            match op() {
                Err(e) if is_descriptor_exhaustion(&e) && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.delay_for(retry);
                    log::debug!(
                        "Descriptor limit hit ({}); retry {}/{} in {:?}",
                        e,
                        retry,
                        self.max_retries,
                        delay
                    );
                    cancel.sleep(delay)?;
                }
                other => return Ok(other),
            }
        }
    }
}
