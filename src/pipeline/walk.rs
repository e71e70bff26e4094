//! Traversal engine: recursive, concurrent walk of a checked-out tree that counts lines per language.
//!
//! Every subdirectory and every file is its own task on the rayon pool; `rayon::scope` does not
//! return until all of them (and everything they spawned) have finished. Each listing, stat and
//! read goes through the request's [`RequestFs`], so it is admitted by the limiter, retried on
//! descriptor exhaustion, and refused once the request is cancelled.

use std::path::{Path, PathBuf};

use crate::error::AnalysisError;
use crate::pipeline::context::WalkContext;
use crate::pipeline::error_handler::finish_walk;
use crate::pipeline::fs::{EntryKind, RequestFs};
use crate::pipeline::languages::classify;
use crate::pipeline::lines::count_lines;
use crate::types::AnalysisResult;
use crate::utils::config::WalkConsts;

/// Walk `root` and return per-language line counts.
///
/// Fails on the first listing or stat error, or with `Cancelled` when the token trips. A failed
/// file read is logged and counts as zero lines.
pub fn traverse(root: &Path, fs: &RequestFs) -> Result<AnalysisResult, AnalysisError> {
    let ctx = WalkContext::new(fs.clone());
    {
        let ctx = &ctx;
        let root = root.to_path_buf();
        rayon::scope(move |s| walk_dir(s, root, ctx));
    }
    let result = finish_walk(ctx)?;
    log::debug!(
        "Traversal of {} done: {} lines in {} languages",
        root.display(),
        result.total_lines,
        result.stats.len()
    );
    Ok(result)
}

fn is_metadata_dir(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n == WalkConsts::METADATA_DIR)
}

fn walk_dir<'s>(s: &rayon::Scope<'s>, dir: PathBuf, ctx: &'s WalkContext) {
    if ctx.should_stop() {
        return;
    }
    let entries = match ctx.fs.read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            ctx.record_error(e);
            return;
        }
    };
    for path in entries {
        if is_metadata_dir(&path) {
            continue;
        }
        s.spawn(move |s| visit_entry(s, path, ctx));
    }
}

fn visit_entry<'s>(s: &rayon::Scope<'s>, path: PathBuf, ctx: &'s WalkContext) {
    if ctx.should_stop() {
        return;
    }
    match ctx.fs.entry_kind(&path) {
        Ok(EntryKind::Dir) => walk_dir(s, path, ctx),
        Ok(EntryKind::File) => count_file(&path, ctx),
        Ok(EntryKind::Other) => {}
        Err(e) => ctx.record_error(e),
    }
}

fn count_file(path: &Path, ctx: &WalkContext) {
    let Some(language) = classify(path) else {
        return;
    };
    match ctx.fs.read(path) {
        Ok(content) => ctx.add_lines(language, count_lines(&content)),
        Err(e) if e.is_cancelled() => ctx.record_error(e),
        Err(e) => {
            log::warn!("Could not read {}: {}", path.display(), e);
            ctx.record_skipped(path.to_path_buf(), e.to_string());
        }
    }
}
