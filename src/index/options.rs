use std::sync::Arc;
use std::time::Duration;

use crate::index::metrics::{default_metrics, IndexMetrics};
use crate::primitives::kv::KvOptions;
use crate::storage::StorageOptions;

/// Default maximum phrase length tracked exactly.
pub const DEFAULT_PREFIX_LENGTH: u8 = 4;

/// How [`crate::index::PhraseIndex::count_occurrences`] floors its result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CountFloor {
    /// Phrases with no stored occurrence (absent, or reclaimed to zero or
    /// below) count 0; anything else returns the measured count.
    #[default]
    Present,
    /// Every result is at least 1, even for unknown phrases.
    Always,
}

impl CountFloor {
    pub(crate) fn apply(self, count: i64) -> u64 {
        match self {
            CountFloor::Present => u64::try_from(count).unwrap_or(0),
            CountFloor::Always => u64::try_from(count.max(1)).unwrap_or(1),
        }
    }
}

/// Configuration for the background garbage collector.
#[derive(Clone, Debug)]
pub struct GcCfg {
    /// Whether the background worker is started on open.
    pub enabled: bool,
    /// Idle time between cycles.
    pub timeout: Duration,
    /// Maximum keys touched per cycle.
    pub batch_size: usize,
}

impl Default for GcCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(1),
            batch_size: 1000,
        }
    }
}

/// Options for opening a [`crate::index::PhraseIndex`].
#[derive(Clone)]
pub struct IndexOptions {
    /// Maximum phrase length tracked exactly.
    pub prefix_length: u8,
    /// Garbage collector pacing.
    pub gc: GcCfg,
    /// Defer durability until `force_compaction`.
    pub bulk_load: bool,
    /// Floor applied to occurrence counts.
    pub count_floor: CountFloor,
    /// Fsync the batch log on every commit (ignored during bulk load).
    pub sync_writes: bool,
    /// Batch log size that triggers a store snapshot.
    pub log_compaction_bytes: u64,
    /// Size at which corpus segments roll over.
    pub max_segment_bytes: u64,
    /// Sentence pairs cached per collector.
    pub sample_cache_capacity: usize,
    /// Sink for operational counters.
    pub metrics: Arc<dyn IndexMetrics>,
}

impl std::fmt::Debug for IndexOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexOptions")
            .field("prefix_length", &self.prefix_length)
            .field("gc", &self.gc)
            .field("bulk_load", &self.bulk_load)
            .field("count_floor", &self.count_floor)
            .field("sync_writes", &self.sync_writes)
            .field("log_compaction_bytes", &self.log_compaction_bytes)
            .field("max_segment_bytes", &self.max_segment_bytes)
            .field("sample_cache_capacity", &self.sample_cache_capacity)
            .finish_non_exhaustive()
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX_LENGTH)
    }
}

impl IndexOptions {
    /// Creates options for `prefix_length` with every other setting defaulted.
    pub fn new(prefix_length: u8) -> Self {
        let kv = KvOptions::default();
        Self {
            prefix_length,
            gc: GcCfg::default(),
            bulk_load: false,
            count_floor: CountFloor::default(),
            sync_writes: kv.sync_writes,
            log_compaction_bytes: kv.log_compaction_bytes,
            max_segment_bytes: StorageOptions::default().max_segment_bytes,
            sample_cache_capacity: 1024,
            metrics: default_metrics(),
        }
    }

    /// Replaces the garbage collector configuration.
    pub fn gc(mut self, cfg: GcCfg) -> Self {
        self.gc = cfg;
        self
    }

    /// Sets the garbage collector idle timeout.
    pub fn gc_timeout(mut self, timeout: Duration) -> Self {
        self.gc.timeout = timeout;
        self
    }

    /// Sets the maximum keys the garbage collector touches per cycle.
    pub fn gc_batch_size(mut self, batch_size: usize) -> Self {
        self.gc.batch_size = batch_size;
        self
    }

    /// Enables or disables the background garbage collector.
    pub fn gc_enabled(mut self, enabled: bool) -> Self {
        self.gc.enabled = enabled;
        self
    }

    /// Enables bulk-load mode.
    pub fn bulk_load(mut self, enabled: bool) -> Self {
        self.bulk_load = enabled;
        self
    }

    /// Selects the count floor policy.
    pub fn count_floor(mut self, floor: CountFloor) -> Self {
        self.count_floor = floor;
        self
    }

    /// Enables or disables fsync after each commit.
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    /// Sets the batch log size that triggers a snapshot.
    pub fn log_compaction_bytes(mut self, bytes: u64) -> Self {
        self.log_compaction_bytes = bytes;
        self
    }

    /// Sets the corpus segment roll-over size.
    pub fn max_segment_bytes(mut self, bytes: u64) -> Self {
        self.max_segment_bytes = bytes;
        self
    }

    /// Sets the per-collector sentence cache size.
    pub fn sample_cache_capacity(mut self, entries: usize) -> Self {
        self.sample_cache_capacity = entries;
        self
    }

    /// Installs a metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn IndexMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub(crate) fn kv_options(&self) -> KvOptions {
        KvOptions {
            sync_writes: self.sync_writes && !self.bulk_load,
            log_compaction_bytes: if self.bulk_load {
                0
            } else {
                self.log_compaction_bytes
            },
            ..KvOptions::default()
        }
    }

    pub(crate) fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            max_segment_bytes: self.max_segment_bytes,
        }
    }
}
