#![forbid(unsafe_code)]
//! Embedded ordered key-value store.
//!
//! A sorted in-memory table is made durable by an append-only batch log and
//! periodic snapshots. Writers are serialized on the log mutex; a committed
//! batch is applied to the table under a single write lock so readers see
//! all of it or none of it. Merge operands are folded at commit time through
//! the registered [`MergeOperator`].
//!
//! The whole table is memory resident; the log and snapshot only make it
//! durable. Compaction copies the table under the writer lock and writes
//! the snapshot after releasing it, so commits are only held up for the
//! copy. Commits never compact: crossing the log threshold marks the store
//! and the owner calls [`OrderedStore::compact_if_due`] from a thread that
//! holds no locks of its own.

mod batch;
mod log;
mod snapshot;

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, info};

use crate::primitives::bytes::ord::prefix_successor;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::IndexError;

pub use batch::{BatchOp, WriteBatch};

use self::log::BatchLog;

type Result<T> = std::result::Result<T, IndexError>;

const LOG_FILE: &str = "index.log";
const LOG_TMP_FILE: &str = "index.log.tmp";
const DEFAULT_SCAN_CHUNK: usize = 256;

/// Associative combiner consulted for [`BatchOp::Merge`] operations.
pub trait MergeOperator: Send + Sync + 'static {
    /// Name recorded in logs.
    fn name(&self) -> &'static str;

    /// Folds `operand` into `existing`. Returning `None` declines the merge
    /// and fails the whole batch.
    fn merge(&self, key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>>;

    /// Compaction filter: entries for which this returns `false` are dropped
    /// from the next snapshot.
    fn retain(&self, _key: &[u8], _value: &[u8]) -> bool {
        true
    }
}

/// Durability and compaction knobs for [`OrderedStore`].
#[derive(Clone, Debug)]
pub struct KvOptions {
    /// Fsync the batch log after every commit.
    pub sync_writes: bool,
    /// Log size at which [`OrderedStore::compaction_due`] turns true; `0`
    /// disables it.
    pub log_compaction_bytes: u64,
    /// Entries copied per read-lock acquisition while iterating.
    pub scan_chunk: usize,
}

impl Default for KvOptions {
    fn default() -> Self {
        Self {
            sync_writes: true,
            log_compaction_bytes: 64 * 1024 * 1024,
            scan_chunk: DEFAULT_SCAN_CHUNK,
        }
    }
}

/// Point-in-time counters describing an [`OrderedStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Live keys in the table.
    pub keys: u64,
    /// Sequence number of the last committed batch.
    pub last_seq: u64,
    /// Bytes held by the batch log.
    pub log_bytes: u64,
    /// Batches committed since open.
    pub commits: u64,
    /// Snapshots written since open.
    pub compactions: u64,
}

struct WriterState {
    log: BatchLog,
    last_seq: u64,
    commits: u64,
    compactions: u64,
}

/// Ordered byte-string map with atomic write batches and a merge hook.
pub struct OrderedStore {
    dir: PathBuf,
    options: KvOptions,
    merge: Arc<dyn MergeOperator>,
    table: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    writer: Mutex<WriterState>,
    compaction: Mutex<()>,
    compaction_due: AtomicBool,
}

impl std::fmt::Debug for OrderedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedStore")
            .field("dir", &self.dir)
            .field("merge", &self.merge.name())
            .finish_non_exhaustive()
    }
}

impl OrderedStore {
    /// Opens the store in `dir`, creating it when absent, and replays the
    /// batch log on top of the last snapshot.
    pub fn open(
        dir: impl AsRef<Path>,
        options: KvOptions,
        merge: Arc<dyn MergeOperator>,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let (snap_seq, mut table) = match snapshot::load(&dir)? {
            Some(snap) => (snap.seq, snap.entries),
            None => (0, BTreeMap::new()),
        };
        let io = StdFileIo::open(dir.join(LOG_FILE))?;
        let mut log = BatchLog::open(Arc::new(io))?;
        if log.base_seq() > snap_seq {
            return Err(IndexError::Corruption(
                "batch log continues from a snapshot that is missing",
            ));
        }
        let frames = log.replay()?;
        let mut last_seq = snap_seq;
        let mut replayed = 0usize;
        for frame in frames {
            if frame.seq <= snap_seq {
                continue;
            }
            let batch = WriteBatch::decode(&frame.payload)?;
            let staged = stage(merge.as_ref(), &table, batch)?;
            apply(&mut table, staged);
            last_seq = frame.seq;
            replayed += 1;
        }
        info!(
            dir = %dir.display(),
            keys = table.len(),
            snapshot_seq = snap_seq,
            replayed,
            merge = merge.name(),
            "kv.open"
        );
        Ok(Self {
            dir,
            options,
            merge,
            table: RwLock::new(table),
            writer: Mutex::new(WriterState {
                log,
                last_seq,
                commits: 0,
                compactions: 0,
            }),
            compaction: Mutex::new(()),
            compaction_due: AtomicBool::new(false),
        })
    }

    /// Atomically applies `batch` and returns its sequence number.
    ///
    /// Merge results are computed before anything is written; a declined
    /// merge or a failed log append leaves the store untouched.
    pub fn write(&self, batch: WriteBatch) -> Result<u64> {
        let mut writer = self.writer.lock();
        if batch.is_empty() {
            return Ok(writer.last_seq);
        }
        let payload = batch.encode();
        let ops = batch.len();
        let staged = {
            let table = self.table.read();
            stage(self.merge.as_ref(), &table, batch)?
        };
        let seq = writer.last_seq + 1;
        let frame_start = writer.log.len();
        writer.log.append(seq, &payload)?;
        if self.options.sync_writes {
            if let Err(err) = writer.log.sync() {
                writer.log.discard_last(frame_start);
                return Err(err);
            }
        }
        apply(&mut self.table.write(), staged);
        writer.last_seq = seq;
        writer.commits += 1;
        debug!(seq, ops, bytes = payload.len(), "kv.write.commit");
        let threshold = self.options.log_compaction_bytes;
        if threshold > 0 && writer.log.len() >= threshold {
            self.compaction_due.store(true, Ordering::Release);
        }
        Ok(seq)
    }

    /// Returns a copy of the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.table.read().get(key).cloned()
    }

    /// Iterates every entry in key order.
    pub fn iter(&self) -> StoreIter<'_> {
        self.scan(Bound::Unbounded, None)
    }

    /// Iterates entries with keys `>= start`.
    pub fn scan_from(&self, start: &[u8]) -> StoreIter<'_> {
        self.scan(Bound::Included(start.to_vec()), None)
    }

    /// Iterates entries whose key starts with `prefix`.
    pub fn scan_prefix(&self, prefix: &[u8]) -> StoreIter<'_> {
        self.scan(Bound::Included(prefix.to_vec()), prefix_successor(prefix))
    }

    /// Iterates entries from `lower` up to, but excluding, `upper`.
    pub fn scan(&self, lower: Bound<Vec<u8>>, upper: Option<Vec<u8>>) -> StoreIter<'_> {
        StoreIter {
            store: self,
            next_from: lower,
            upper,
            buf: VecDeque::new(),
            done: false,
        }
    }

    /// Returns true once the batch log has grown past
    /// [`KvOptions::log_compaction_bytes`] since the last snapshot.
    pub fn compaction_due(&self) -> bool {
        self.compaction_due.load(Ordering::Acquire)
    }

    /// Compacts when [`Self::compaction_due`] is set and no other
    /// compaction is running. Returns the snapshot size if one was written.
    pub fn compact_if_due(&self) -> Result<Option<u64>> {
        if !self.compaction_due() {
            return Ok(None);
        }
        let Some(guard) = self.compaction.try_lock() else {
            return Ok(None);
        };
        let written = self.compact_exclusive()?;
        drop(guard);
        Ok(Some(written))
    }

    /// Writes a snapshot of the table, dropping entries the merge operator
    /// no longer retains, and empties the batch log.
    ///
    /// Batches committed while the snapshot is written stay in the log.
    pub fn compact(&self) -> Result<u64> {
        let _compaction = self.compaction.lock();
        self.compact_exclusive()
    }

    fn compact_exclusive(&self) -> Result<u64> {
        let (seq, mark, dropped, entries) = {
            let writer = self.writer.lock();
            let mut table = self.table.write();
            let before = table.len();
            table.retain(|k, v| self.merge.retain(k, v));
            let dropped = before - table.len();
            let table = RwLockWriteGuard::downgrade(table);
            let entries: Vec<(Vec<u8>, Vec<u8>)> =
                table.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            self.compaction_due.store(false, Ordering::Release);
            (writer.last_seq, writer.log.len(), dropped, entries)
        };
        let written = snapshot::write(
            &self.dir,
            seq,
            entries.len() as u64,
            entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())),
        )?;
        drop(entries);

        let mut writer = self.writer.lock();
        let tail = writer.log.tail_from(mark)?;
        if tail.is_empty() {
            writer.log.reset(seq)?;
        } else {
            let tmp = self.dir.join(LOG_TMP_FILE);
            let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(&tmp)?);
            let log = BatchLog::create(io, seq, &tail)?;
            std::fs::rename(&tmp, self.dir.join(LOG_FILE))?;
            writer.log = log;
        }
        writer.compactions += 1;
        info!(
            seq,
            keys = written,
            dropped,
            carried_bytes = tail.len(),
            "kv.compact"
        );
        Ok(written)
    }

    /// Forces buffered log frames to disk.
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().log.sync()
    }

    /// Returns current table and log counters.
    pub fn stats(&self) -> StoreStats {
        let writer = self.writer.lock();
        StoreStats {
            keys: self.table.read().len() as u64,
            last_seq: writer.last_seq,
            log_bytes: writer.log.len(),
            commits: writer.commits,
            compactions: writer.compactions,
        }
    }

    /// Directory holding the log and snapshot.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

type Staged = Vec<(Vec<u8>, Option<Vec<u8>>)>;

/// Resolves every op of `batch` against `base` without mutating it.
fn stage(
    merge: &dyn MergeOperator,
    base: &BTreeMap<Vec<u8>, Vec<u8>>,
    batch: WriteBatch,
) -> Result<Staged> {
    let mut overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
    for op in batch.into_ops() {
        match op {
            BatchOp::Put { key, value } => {
                overlay.insert(key, Some(value));
            }
            BatchOp::Delete { key } => {
                overlay.insert(key, None);
            }
            BatchOp::Merge { key, operand } => {
                let merged = {
                    let existing = match overlay.get(&key) {
                        Some(staged) => staged.as_deref(),
                        None => base.get(&key).map(Vec::as_slice),
                    };
                    merge.merge(&key, existing, &operand)
                };
                let merged = merged.ok_or(IndexError::MergeDeclined {
                    tag: key.first().copied().unwrap_or_default(),
                })?;
                overlay.insert(key, Some(merged));
            }
        }
    }
    Ok(overlay.into_iter().collect())
}

fn apply(table: &mut BTreeMap<Vec<u8>, Vec<u8>>, staged: Staged) {
    for (key, value) in staged {
        match value {
            Some(value) => {
                table.insert(key, value);
            }
            None => {
                table.remove(&key);
            }
        }
    }
}

/// Forward iterator that copies entries out of the table in bounded chunks.
///
/// Each refill takes the read lock briefly, so long scans never stall
/// writers. Entries committed behind the iterator's position are not seen;
/// entries committed ahead of it may be.
pub struct StoreIter<'a> {
    store: &'a OrderedStore,
    next_from: Bound<Vec<u8>>,
    upper: Option<Vec<u8>>,
    buf: VecDeque<(Vec<u8>, Vec<u8>)>,
    done: bool,
}

impl StoreIter<'_> {
    fn refill(&mut self) {
        let chunk = self.store.options.scan_chunk.max(1);
        let lower = match &self.next_from {
            Bound::Included(k) => Bound::Included(k.as_slice()),
            Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };
        if let (Some(upper), Bound::Included(k) | Bound::Excluded(k)) = (&self.upper, lower) {
            if k >= upper.as_slice() {
                self.done = true;
                return;
            }
        }
        let upper = match &self.upper {
            Some(u) => Bound::Excluded(u.as_slice()),
            None => Bound::Unbounded,
        };
        let table = self.store.table.read();
        for (k, v) in table.range::<[u8], _>((lower, upper)).take(chunk) {
            self.buf.push_back((k.clone(), v.clone()));
        }
        drop(table);
        if self.buf.len() < chunk {
            self.done = true;
        }
        if let Some((last, _)) = self.buf.back() {
            self.next_from = Bound::Excluded(last.clone());
        }
    }
}

impl Iterator for StoreIter<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() && !self.done {
            self.refill();
        }
        self.buf.pop_front()
    }
}
