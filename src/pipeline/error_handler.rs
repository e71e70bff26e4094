use std::path::PathBuf;

use crate::error::AnalysisError;
use crate::pipeline::context::WalkContext;
use crate::types::AnalysisResult;

/// Settle a finished walk: the recorded error (a cancellation if any task saw one), otherwise log
/// skipped files and return the counts.
///
/// The deadline is not consulted here. A walk in which every task ran to completion keeps its
/// result even if the clock passes the deadline while it is being settled.
pub fn finish_walk(ctx: WalkContext) -> Result<AnalysisResult, AnalysisError> {
    let (tally, first_error, skipped) = ctx.into_parts();
    if let Some(err) = first_error {
        return Err(err);
    }
    report_skipped_files(&skipped);
    Ok(tally.into_result())
}

fn report_skipped_files(skipped: &[(PathBuf, String)]) {
    if skipped.is_empty() {
        return;
    }
    log::warn!(
        "Skipped {} files that could not be read (counted as 0 lines)",
        skipped.len()
    );
    for (path, reason) in skipped {
        log::debug!("  skipped: {} ({})", path.display(), reason);
    }
}
