//! File operations: a base interface over the real filesystem, and the per-request decorator
//! that adds admission control, descriptor-exhaustion retry, cancellation and a symlink shim.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::AnalysisError;
use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::limiter::ConcurrencyLimiter;
use crate::pipeline::retry::RetryPolicy;

/// What a directory entry turned out to be after `stat`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Other,
}

/// Raw filesystem calls. Implemented by [`StdFs`]; tests substitute their own to inject failures.
pub trait FileOps: Send + Sync {
    /// Paths of the entries directly under `dir`.
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;
    /// Kind of `path`, following symlinks.
    fn entry_kind(&self, path: &Path) -> io::Result<EntryKind>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
}

/// Pass-through to `std::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdFs;

impl FileOps for StdFs {
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn entry_kind(&self, path: &Path) -> io::Result<EntryKind> {
        let meta = fs::metadata(path)?;
        Ok(if meta.is_dir() {
            EntryKind::Dir
        } else if meta.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        })
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents)
    }
}

/// The file operations one request uses. Built once per request; cheap to clone.
///
/// Every call: fails fast with `Cancelled` if the token tripped, waits for a limiter permit,
/// then runs the base call under the retry policy. `symlink` is a no-op shim.
#[derive(Clone)]
pub struct RequestFs {
    base: Arc<dyn FileOps>,
    limiter: Arc<ConcurrencyLimiter>,
    cancel: CancellationToken,
    retry: RetryPolicy,
}

impl RequestFs {
    pub fn new(
        base: Arc<dyn FileOps>,
        limiter: Arc<ConcurrencyLimiter>,
        cancel: CancellationToken,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            base,
            limiter,
            cancel,
            retry,
        }
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    fn call<T, F>(&self, op: &'static str, path: &Path, f: F) -> Result<T, AnalysisError>
    where
        F: FnMut() -> io::Result<T>,
    {
        self.cancel.check()?;
        let outcome = self
            .limiter
            .run(&self.cancel, || self.retry.run(&self.cancel, f))??;
        outcome.map_err(|e| AnalysisError::io(op, path, e))
    }

    pub fn read_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, AnalysisError> {
        self.call("read directory", dir, || self.base.read_dir(dir))
    }

    pub fn entry_kind(&self, path: &Path) -> Result<EntryKind, AnalysisError> {
        self.call("stat", path, || self.base.entry_kind(path))
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>, AnalysisError> {
        self.call("read", path, || self.base.read(path))
    }

    pub fn create_dir_all(&self, path: &Path) -> Result<(), AnalysisError> {
        self.call("create directory", path, || self.base.create_dir_all(path))
    }

    pub fn write(&self, path: &Path, contents: &[u8]) -> Result<(), AnalysisError> {
        self.call("write", path, || self.base.write(path, contents))
    }

    /// No-op: only file names and contents matter for counting, and link creation is unsupported
    /// or unwanted on some hosts.
    pub fn symlink(&self, target: &Path, link: &Path) -> Result<(), AnalysisError> {
        self.cancel.check()?;
        log::trace!(
            "Skipping link {} -> {}",
            link.display(),
            target.display()
        );
        Ok(())
    }
}
