use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_index;
use crate::admin::Result;

/// Report generated after compacting an index.
#[derive(Debug, Clone, Serialize)]
pub struct CompactReport {
    /// Duration of the compaction in milliseconds.
    pub duration_ms: f64,
    /// Store keys before compaction.
    pub keys_before: u64,
    /// Store keys after compaction; reclaimed postings and zero counters
    /// are dropped.
    pub keys_after: u64,
    /// Batch log size before compaction.
    pub log_bytes_before: u64,
    /// Batch log size after compaction.
    pub log_bytes_after: u64,
}

/// Forces a store snapshot, which also finalizes a bulk-loaded index.
///
/// # Errors
///
/// Returns an error if the index cannot be opened or the snapshot fails.
pub fn compact(path: impl AsRef<Path>, opts: &AdminOpenOptions) -> Result<CompactReport> {
    let index = open_index(path.as_ref(), opts)?;
    let before = index.stats();
    let start = Instant::now();
    index.force_compaction()?;
    let elapsed = start.elapsed();
    let after = index.stats();
    index.close()?;
    info!(
        keys_before = before.keys,
        keys_after = after.keys,
        "admin.compact"
    );
    Ok(CompactReport {
        duration_ms: elapsed.as_secs_f64() * 1000.0,
        keys_before: before.keys,
        keys_after: after.keys,
        log_bytes_before: before.log_bytes,
        log_bytes_after: after.log_bytes,
    })
}
