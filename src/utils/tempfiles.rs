use anyhow::{Context, Result};
use std::path::Path;
use tempfile::TempDir;

/// Per-request scratch directory. Removed when dropped, on every exit path; a failed removal is
/// logged and never replaces the request's own outcome.
pub struct WorkDir {
    dir: Option<TempDir>,
}

impl WorkDir {
    /// Create a fresh, empty directory under the system temp dir.
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", env!("CARGO_PKG_NAME")))
            .tempdir()
            .context("create temporary working directory")?;
        log::debug!("Working directory: {}", dir.path().display());
        Ok(Self { dir: Some(dir) })
    }

    pub fn path(&self) -> &Path {
        // Only `Drop` takes the directory out.
        self.dir.as_ref().map(TempDir::path).unwrap_or(Path::new(""))
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => log::debug!("Removed working directory {}", path.display()),
            Err(e) => log::warn!(
                "Failed to remove working directory {}: {}",
                path.display(),
                e
            ),
        }
    }
}
