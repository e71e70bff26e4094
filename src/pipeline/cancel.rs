//! Cancellation context: a one-way signal tied to a wall-clock deadline, plus the timer that trips it.

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::AnalysisError;

struct Inner {
    tripped: AtomicBool,
    deadline: Instant,
    timeout: Duration,
    /// Wakes backoff sleepers when the signal trips.
    wake_lock: Mutex<()>,
    wake: Condvar,
}

/// Shared, read-only view of one request's cancellation state. Clones observe the same signal.
/// Once tripped it never resets.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Token whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tripped: AtomicBool::new(false),
                deadline: Instant::now() + timeout,
                timeout,
                wake_lock: Mutex::new(()),
                wake: Condvar::new(),
            }),
        }
    }

    /// True once the deadline timer has fired or the deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        if self.inner.tripped.load(Ordering::Acquire) {
            return true;
        }
        if Instant::now() >= self.inner.deadline {
            self.mark_tripped();
            return true;
        }
        false
    }

    fn expired(&self) -> bool {
        self.inner.tripped.load(Ordering::Acquire) || Instant::now() >= self.inner.deadline
    }

    /// `Err(Cancelled)` when tripped. Call before starting any blocking step.
    pub fn check(&self) -> Result<(), AnalysisError> {
        if self.is_cancelled() {
            Err(self.error())
        } else {
            Ok(())
        }
    }

    /// The error every cancelled step reports.
    pub fn error(&self) -> AnalysisError {
        AnalysisError::Cancelled {
            timeout_secs: self.inner.timeout.as_secs(),
        }
    }

    /// Time left before the deadline (zero once passed).
    pub fn remaining(&self) -> Duration {
        self.inner.deadline.saturating_duration_since(Instant::now())
    }

    /// Sleep for `dur`, waking early with `Err(Cancelled)` if the signal trips meanwhile.
    pub fn sleep(&self, dur: Duration) -> Result<(), AnalysisError> {
        let until = Instant::now() + dur;
        let mut guard = self
            .inner
            .wake_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        loop {
            if self.expired() {
                return Err(self.error());
            }
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            let wait = (until - now).min(self.remaining().max(Duration::from_millis(1)));
            guard = self
                .inner
                .wake
                .wait_timeout(guard, wait)
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    fn mark_tripped(&self) {
        if !self.inner.tripped.swap(true, Ordering::AcqRel) {
            log::debug!(
                "Cancellation tripped after {}s deadline",
                self.inner.timeout.as_secs()
            );
        }
    }

    fn trip(&self) {
        self.mark_tripped();
        let _guard = self
            .inner
            .wake_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        self.inner.wake.notify_all();
    }
}

/// Timer thread that trips a token at its deadline. Dropping it disarms the timer and joins the
/// thread, so a finished request leaves nothing behind.
pub struct DeadlineTimer {
    disarm_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DeadlineTimer {
    pub fn start(token: &CancellationToken) -> Self {
        let (disarm_tx, disarm_rx) = bounded::<()>(0);
        let token = token.clone();
        let handle = thread::spawn(move || {
            // Disconnected = request finished first.
            if let Err(RecvTimeoutError::Timeout) = disarm_rx.recv_timeout(token.remaining()) {
                token.trip();
            }
        });
        Self {
            disarm_tx: Some(disarm_tx),
            handle: Some(handle),
        }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        drop(self.disarm_tx.take());
        if let Some(h) = self.handle.take()
            && h.join().is_err()
        {
            log::warn!("deadline timer thread panicked");
        }
    }
}
