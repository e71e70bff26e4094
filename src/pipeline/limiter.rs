//! Counting admission gate for filesystem operations.

use std::sync::{Condvar, Mutex, MutexGuard};

use crate::error::AnalysisError;
use crate::pipeline::cancel::CancellationToken;
use crate::utils::config::WalkConsts;

/// Bounds how many filesystem operations run at once. Waiters queue (unordered) until a permit
/// frees; a waiter gives up with `Cancelled` once the request's token trips.
pub struct ConcurrencyLimiter {
    capacity: usize,
    in_flight: Mutex<usize>,
    freed: Condvar,
}

/// Held while an operation runs; returns its permit on drop, including on error or panic.
struct Permit<'a> {
    limiter: &'a ConcurrencyLimiter,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.limiter.lock();
        *in_flight = in_flight.saturating_sub(1);
        drop(in_flight);
        self.limiter.freed.notify_one();
    }
}

impl ConcurrencyLimiter {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_flight: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        *self.lock()
    }

    /// Run `task` once a permit is available. The permit is released exactly once after `task`
    /// returns, whatever it returns.
    pub fn run<T, F>(&self, cancel: &CancellationToken, task: F) -> Result<T, AnalysisError>
    where
        F: FnOnce() -> T,
    {
        let _permit = self.acquire(cancel)?;
        Ok(task())
    }

    fn acquire(&self, cancel: &CancellationToken) -> Result<Permit<'_>, AnalysisError> {
        let mut in_flight = self.lock();
        while *in_flight >= self.capacity {
            if cancel.is_cancelled() {
                return Err(cancel.error());
            }
            in_flight = self
                .freed
                .wait_timeout(in_flight, WalkConsts::PERMIT_POLL)
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        *in_flight += 1;
        Ok(Permit { limiter: self })
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}
