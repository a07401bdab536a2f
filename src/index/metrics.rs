use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sink for operational counters of a phrase index.
///
/// Implementations must be cheap; hooks run on ingestion, query and
/// garbage-collection paths.
pub trait IndexMetrics: Send + Sync {
    /// A batch committed `entries` corpus entries touching `keys` index keys.
    fn batch_committed(&self, entries: u64, keys: u64);

    /// A batch failed before or during commit.
    fn batch_failed(&self);

    /// An occurrence count was answered for `side` ("source" or "target").
    fn count_query(&self, side: &'static str);

    /// A sampling request returned `samples` results.
    fn samples_returned(&self, samples: u64);

    /// A collector lookup hit or missed its sentence cache.
    fn sample_cache(&self, hit: bool);

    /// A garbage collection cycle touched `keys` keys.
    fn gc_cycle(&self, keys: u64);

    /// A deleted domain was fully reclaimed.
    fn domain_reclaimed(&self);
}

/// [`IndexMetrics`] that discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl IndexMetrics for NoopMetrics {
    fn batch_committed(&self, _entries: u64, _keys: u64) {}
    fn batch_failed(&self) {}
    fn count_query(&self, _side: &'static str) {}
    fn samples_returned(&self, _samples: u64) {}
    fn sample_cache(&self, _hit: bool) {}
    fn gc_cycle(&self, _keys: u64) {}
    fn domain_reclaimed(&self) {}
}

/// Atomic counters for every [`IndexMetrics`] hook.
#[derive(Default)]
pub struct CounterMetrics {
    /// Committed batches.
    pub batches: AtomicU64,
    /// Failed batches.
    pub batch_failures: AtomicU64,
    /// Corpus entries committed.
    pub entries: AtomicU64,
    /// Index keys written by committed batches.
    pub keys_written: AtomicU64,
    /// Source-side count queries.
    pub source_counts: AtomicU64,
    /// Target-side count queries.
    pub target_counts: AtomicU64,
    /// Samples returned to callers.
    pub samples: AtomicU64,
    /// Sentence cache hits.
    pub cache_hits: AtomicU64,
    /// Sentence cache misses.
    pub cache_misses: AtomicU64,
    /// Garbage collection cycles that did work.
    pub gc_cycles: AtomicU64,
    /// Keys touched by the garbage collector.
    pub gc_keys: AtomicU64,
    /// Domains fully reclaimed.
    pub domains_reclaimed: AtomicU64,
}

impl IndexMetrics for CounterMetrics {
    fn batch_committed(&self, entries: u64, keys: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.entries.fetch_add(entries, Ordering::Relaxed);
        self.keys_written.fetch_add(keys, Ordering::Relaxed);
    }

    fn batch_failed(&self) {
        self.batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn count_query(&self, side: &'static str) {
        match side {
            "source" => {
                self.source_counts.fetch_add(1, Ordering::Relaxed);
            }
            "target" => {
                self.target_counts.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn samples_returned(&self, samples: u64) {
        self.samples.fetch_add(samples, Ordering::Relaxed);
    }

    fn sample_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn gc_cycle(&self, keys: u64) {
        self.gc_cycles.fetch_add(1, Ordering::Relaxed);
        self.gc_keys.fetch_add(keys, Ordering::Relaxed);
    }

    fn domain_reclaimed(&self) {
        self.domains_reclaimed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics sink, a [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn IndexMetrics> {
    Arc::new(NoopMetrics)
}
