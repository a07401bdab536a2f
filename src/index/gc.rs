//! Background reclamation of deleted domains.
//!
//! A deleted domain goes through two phases, both persisted in its marker:
//!
//! 1. `Counts`: the domain's stored sentences are re-read and negative
//!    target-count deltas merged, a bounded number of keys per cycle. The
//!    read position is committed in the same batch as the deltas, so a
//!    restart resumes without subtracting twice.
//! 2. `Postings`: an in-memory cursor sweeps the source-prefix key range and
//!    deletes posting lists of swept domains. Once a sweep that began after
//!    the domain entered this phase reaches the end of the range, the
//!    domain's segments are detached, the manifest rewritten and the marker
//!    removed in one batch; the segment files are deleted afterwards.
//!
//! The sweep cursor is not persisted; a restart begins a new sweep.

use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::index::keys::{
    deleted_domain_key, deleted_domain_prefix, manifest_key, IndexKey, TAG_SOURCE_PREFIX,
};
use crate::index::options::GcCfg;
use crate::index::phrase_index::IndexCore;
use crate::index::postings::encode_counter;
use crate::primitives::bytes::buf::Cursor;
use crate::primitives::kv::WriteBatch;
use crate::types::{DomainId, IndexError, Result, SegmentId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Counts,
    Postings,
}

/// Reclamation state stored as the value of a deletion marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DeletionProgress {
    pub phase: Phase,
    pub segment: SegmentId,
    pub offset: u64,
}

impl DeletionProgress {
    pub fn initial() -> Self {
        Self {
            phase: Phase::Counts,
            segment: SegmentId(0),
            offset: 0,
        }
    }

    fn postings() -> Self {
        Self {
            phase: Phase::Postings,
            segment: SegmentId(0),
            offset: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(13);
        out.push(match self.phase {
            Phase::Counts => 0,
            Phase::Postings => 1,
        });
        out.extend_from_slice(&self.segment.0.to_be_bytes());
        out.extend_from_slice(&self.offset.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, IndexError> {
        let mut cur = Cursor::new(bytes);
        let phase = match cur.u8() {
            Some(0) => Phase::Counts,
            Some(1) => Phase::Postings,
            _ => return Err(IndexError::Corruption("deletion marker phase invalid")),
        };
        match (cur.u32(), cur.u64(), cur.is_empty()) {
            (Some(segment), Some(offset), true) => Ok(Self {
                phase,
                segment: SegmentId(segment),
                offset,
            }),
            _ => Err(IndexError::Corruption("deletion marker value malformed")),
        }
    }
}

/// Result of one collection cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Keys written or deleted by the cycle.
    pub keys: usize,
    /// Domains whose reclamation completed during the cycle.
    pub reclaimed: usize,
    /// True when there was nothing to do.
    pub idle: bool,
}

#[derive(Default)]
struct SweepState {
    cursor: Option<Vec<u8>>,
    running: bool,
    targets: FxHashSet<DomainId>,
}

struct GcShared {
    core: Arc<IndexCore>,
    cfg: GcCfg,
    stop: AtomicBool,
    wake: Mutex<bool>,
    cond: Condvar,
    sweep: Mutex<SweepState>,
}

/// Garbage collector bound to one index.
pub(crate) struct GarbageCollector {
    shared: Arc<GcShared>,
    handle: Option<JoinHandle<()>>,
}

impl GarbageCollector {
    pub fn new(core: Arc<IndexCore>, cfg: GcCfg) -> Self {
        Self {
            shared: Arc::new(GcShared {
                core,
                cfg,
                stop: AtomicBool::new(false),
                wake: Mutex::new(false),
                cond: Condvar::new(),
                sweep: Mutex::new(SweepState::default()),
            }),
            handle: None,
        }
    }

    /// Spawns the background worker.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("phrase-index-gc".into())
            .spawn(move || shared.run())
            .map_err(IndexError::from)?;
        self.handle = Some(handle);
        debug!(
            timeout_ms = self.shared.cfg.timeout.as_millis() as u64,
            batch_size = self.shared.cfg.batch_size,
            "gc.started"
        );
        Ok(())
    }

    /// Wakes the worker early, e.g. after new deletions were committed.
    pub fn notify(&self) {
        *self.shared.wake.lock() = true;
        self.shared.cond.notify_one();
    }

    /// Runs cycles on the calling thread until there is nothing left to reclaim.
    pub fn run_until_idle(&self) -> Result<usize> {
        let mut reclaimed = 0;
        loop {
            let outcome = self.shared.cycle()?;
            reclaimed += outcome.reclaimed;
            if outcome.idle {
                return Ok(reclaimed);
            }
        }
    }

    /// Stops the worker at its next cycle boundary and waits for it.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        {
            *self.shared.wake.lock() = true;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("gc.worker_panicked");
            }
            debug!("gc.stopped");
        }
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

impl GcShared {
    fn run(&self) {
        while !self.stop.load(Ordering::Acquire) {
            match self.cycle() {
                Ok(outcome) if !outcome.idle => {
                    debug!(keys = outcome.keys, reclaimed = outcome.reclaimed, "gc.cycle");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "gc.cycle_failed"),
            }
            if let Err(err) = self.core.store.compact_if_due() {
                warn!(error = %err, "gc.auto_compaction_failed");
            }
            let mut wake = self.wake.lock();
            if !*wake && !self.stop.load(Ordering::Acquire) {
                self.cond.wait_for(&mut wake, self.cfg.timeout);
            }
            *wake = false;
        }
    }

    fn cycle(&self) -> Result<CycleOutcome> {
        let mut sweep = self.sweep.lock();
        if !self.core.is_finalized() {
            return Ok(CycleOutcome {
                idle: true,
                ..CycleOutcome::default()
            });
        }
        let markers = self.markers()?;
        if markers.is_empty() {
            *sweep = SweepState::default();
            return Ok(CycleOutcome {
                idle: true,
                ..CycleOutcome::default()
            });
        }
        let outcome = match markers.iter().find(|(_, p)| p.phase == Phase::Counts) {
            Some(&(domain, progress)) => self.reclaim_counts(domain, progress)?,
            None => {
                let sweeping: FxHashSet<DomainId> = markers.iter().map(|(d, _)| *d).collect();
                self.sweep_postings(&mut sweep, &sweeping)?
            }
        };
        if outcome.keys > 0 {
            self.core.metrics.gc_cycle(outcome.keys as u64);
        }
        Ok(outcome)
    }

    fn markers(&self) -> Result<Vec<(DomainId, DeletionProgress)>> {
        let mut markers = Vec::new();
        for (key, value) in self.core.store.scan_prefix(&deleted_domain_prefix()) {
            match self.core.codec.decode(&key)? {
                Some(IndexKey::DeletedDomain(domain)) => {
                    markers.push((domain, DeletionProgress::decode(&value)?));
                }
                _ => return Err(IndexError::Corruption("unexpected key in deletion range").into()),
            }
        }
        Ok(markers)
    }

    fn reclaim_counts(&self, domain: DomainId, progress: DeletionProgress) -> Result<CycleOutcome> {
        let batch_size = self.cfg.batch_size.max(1);
        let prefix_len = usize::from(self.core.codec.prefix_len());
        let mut deltas: FxHashMap<Vec<u8>, i64> = FxHashMap::default();
        let mut next = DeletionProgress::postings();
        let mut records = 0usize;
        for item in self
            .core
            .storage
            .records(domain, progress.segment, progress.offset)
        {
            let (record, segment, offset) = item?;
            records += 1;
            for start in 0..record.target.len() {
                let end = (start + prefix_len).min(record.target.len());
                for stop in start + 1..=end {
                    let key = self.core.codec.target_count(&record.target[start..stop]);
                    *deltas.entry(key).or_default() -= 1;
                }
            }
            if deltas.len() >= batch_size {
                next = DeletionProgress {
                    phase: Phase::Counts,
                    segment,
                    offset,
                };
                break;
            }
        }
        let keys = deltas.len();
        let mut batch = WriteBatch::new();
        for (key, delta) in deltas {
            batch.merge(key, encode_counter(delta));
        }
        batch.put(deleted_domain_key(domain), next.encode());
        self.core.store.write(batch)?;
        debug!(
            domain = domain.0,
            records,
            keys,
            done = next.phase == Phase::Postings,
            "gc.counts"
        );
        Ok(CycleOutcome {
            keys,
            reclaimed: 0,
            idle: false,
        })
    }

    fn sweep_postings(
        &self,
        sweep: &mut SweepState,
        sweeping: &FxHashSet<DomainId>,
    ) -> Result<CycleOutcome> {
        if !sweep.running {
            sweep.running = true;
            sweep.cursor = None;
            sweep.targets = sweeping.clone();
        }
        let lower = match sweep.cursor.take() {
            Some(key) => Bound::Excluded(key),
            None => Bound::Included(vec![TAG_SOURCE_PREFIX]),
        };
        let upper = Some(vec![TAG_SOURCE_PREFIX + 1]);
        let batch_size = self.cfg.batch_size.max(1);
        let mut batch = WriteBatch::new();
        let mut scanned = 0usize;
        let mut last = None;
        let mut reached_end = true;
        for (key, _) in self.core.store.scan(lower, upper) {
            scanned += 1;
            if let Some(IndexKey::SourcePrefix { domain, .. }) = self.core.codec.decode(&key)? {
                if sweeping.contains(&domain) {
                    batch.delete(key.clone());
                }
            }
            last = Some(key);
            if scanned >= batch_size {
                reached_end = false;
                break;
            }
        }
        let keys = batch.len();
        if !batch.is_empty() {
            self.core.store.write(batch)?;
        }
        sweep.cursor = last;
        let mut reclaimed = 0;
        if reached_end {
            let finished: Vec<DomainId> = sweep.targets.drain().collect();
            sweep.running = false;
            sweep.cursor = None;
            for domain in finished {
                self.finalize(domain)?;
                reclaimed += 1;
            }
        }
        debug!(scanned, deleted = keys, reached_end, "gc.sweep");
        Ok(CycleOutcome {
            keys,
            reclaimed,
            idle: false,
        })
    }

    fn finalize(&self, domain: DomainId) -> Result<()> {
        let core = &self.core;
        let detached = {
            let _manifest = core.manifest_lock.lock();
            let detached = core.storage.detach_domain(domain);
            let manifest = core.storage.manifest();
            let mut batch = WriteBatch::new();
            batch.put(manifest_key(), manifest.to_bytes()?);
            batch.delete(deleted_domain_key(domain));
            if let Err(err) = core.store.write(batch) {
                core.storage.reattach(detached);
                return Err(err.into());
            }
            core.deleted.write().remove(&domain);
            detached
        };
        let segments = detached.len();
        if let Err(err) = core.storage.remove_detached(detached) {
            warn!(domain = domain.0, error = %err, "gc.segment_removal_failed");
        }
        core.metrics.domain_reclaimed();
        info!(domain = domain.0, segments, "gc.domain_reclaimed");
        Ok(())
    }
}
