//! Shared state for one traversal: file operations, counters, first error and skipped files.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::error::AnalysisError;
use crate::pipeline::fs::RequestFs;
use crate::types::AnalysisResult;

/// Per-language and total line counts. Both are updated under one lock so the total can never
/// drift from the sum of the per-language counts.
#[derive(Debug, Default)]
pub struct LineTally {
    stats: BTreeMap<String, u64>,
    total: u64,
}

impl LineTally {
    pub fn add(&mut self, language: &str, lines: u64) {
        *self.stats.entry(language.to_string()).or_insert(0) += lines;
        self.total += lines;
    }

    pub fn into_result(self) -> AnalysisResult {
        let result = AnalysisResult::from_stats(self.stats);
        debug_assert_eq!(result.total_lines, self.total);
        result
    }
}

/// Shared by every task spawned during a walk.
pub struct WalkContext {
    pub fs: RequestFs,
    tally: Mutex<LineTally>,
    first_error: Mutex<Option<AnalysisError>>,
    skipped_files: Mutex<Vec<(PathBuf, String)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl WalkContext {
    pub fn new(fs: RequestFs) -> Self {
        Self {
            fs,
            tally: Mutex::new(LineTally::default()),
            first_error: Mutex::new(None),
            skipped_files: Mutex::new(Vec::new()),
        }
    }

    /// Serialized increment of the counters.
    pub fn add_lines(&self, language: &str, lines: u64) {
        lock(&self.tally).add(language, lines);
    }

    /// Keep the first fatal error; later ones are dropped, except that a cancellation replaces
    /// any other error.
    pub fn record_error(&self, err: AnalysisError) {
        let mut slot = lock(&self.first_error);
        let replace = match slot.as_ref() {
            None => true,
            Some(existing) => err.is_cancelled() && !existing.is_cancelled(),
        };
        if replace {
            *slot = Some(err);
        }
    }

    /// A file whose read failed; it contributes nothing.
    pub fn record_skipped(&self, path: PathBuf, reason: String) {
        lock(&self.skipped_files).push((path, reason));
    }

    /// True when no new work should start. A task that stops because the request was cancelled
    /// records the cancellation, so the walk's outcome only depends on what tasks observed.
    pub fn should_stop(&self) -> bool {
        if let Err(e) = self.fs.cancel().check() {
            self.record_error(e);
            return true;
        }
        lock(&self.first_error).is_some()
    }

    /// Split into (tally, first error, skipped files) once all tasks have finished.
    pub fn into_parts(self) -> (LineTally, Option<AnalysisError>, Vec<(PathBuf, String)>) {
        (
            self.tally.into_inner().unwrap_or_else(|e| e.into_inner()),
            self.first_error.into_inner().unwrap_or_else(|e| e.into_inner()),
            self.skipped_files
                .into_inner()
                .unwrap_or_else(|e| e.into_inner()),
        )
    }
}
