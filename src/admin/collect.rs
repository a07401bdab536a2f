use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_index;
use crate::admin::Result;

/// Report generated after a synchronous garbage collection run.
#[derive(Debug, Clone, Serialize)]
pub struct CollectReport {
    /// Duration of the run in milliseconds.
    pub duration_ms: f64,
    /// Domains pending deletion before the run.
    pub pending_before: Vec<u32>,
    /// Domains fully reclaimed.
    pub reclaimed: usize,
    /// Whether a snapshot was written afterwards.
    pub compacted: bool,
}

/// Reclaims every pending domain deletion, optionally compacting after.
///
/// # Errors
///
/// Returns an error if the index cannot be opened or a cycle fails.
pub fn collect_garbage(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    compact: bool,
) -> Result<CollectReport> {
    let index = open_index(path.as_ref(), opts)?;
    let pending_before = index
        .pending_deletions()
        .into_iter()
        .map(u32::from)
        .collect();
    let start = Instant::now();
    let reclaimed = index.collect_garbage()?;
    if compact {
        index.force_compaction()?;
    }
    let elapsed = start.elapsed();
    index.close()?;
    Ok(CollectReport {
        duration_ms: elapsed.as_secs_f64() * 1000.0,
        pending_before,
        reclaimed,
        compacted: compact,
    })
}
