use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::index::batch::UpdateBatch;
use crate::index::collector::{Collector, Context, Sample};
use crate::index::cursor::PrefixCursor;
use crate::index::gc::{DeletionProgress, GarbageCollector};
use crate::index::iterator::IndexIterator;
use crate::index::keys::{
    deleted_domain_key, deleted_domain_prefix, manifest_key, source_prefix_range,
    stored_prefix_len, streams_key, IndexKey, KeyCodec, TAG_TARGET_COUNT,
};
use crate::index::merge::PositionMergeOperator;
use crate::index::metrics::IndexMetrics;
use crate::index::options::IndexOptions;
use crate::index::postings::{decode_counter, encode_counter, Posting, PostingList, Streams};
use crate::primitives::kv::{OrderedStore, WriteBatch};
use crate::storage::{CorporaStorage, StorageManifest};
use crate::types::{DomainId, Length, PhraseError, Result, Side, WordId};

const INDEX_DIR: &str = "index";
const STORAGE_DIR: &str = "storage";

/// State shared by the index handle, its garbage collector and its readers.
pub(crate) struct IndexCore {
    pub store: OrderedStore,
    pub storage: CorporaStorage,
    pub codec: KeyCodec,
    /// Held while a manifest is computed and committed.
    pub manifest_lock: Mutex<()>,
    /// Domains with a committed deletion marker.
    pub deleted: RwLock<FxHashSet<DomainId>>,
    pub metrics: Arc<dyn IndexMetrics>,
    finalized: AtomicBool,
}

impl IndexCore {
    /// False while bulk-loaded data awaits `force_compaction`.
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    pub fn deleted_snapshot(&self) -> FxHashSet<DomainId> {
        self.deleted.read().clone()
    }
}

/// Point-in-time summary of an open index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Maximum phrase length tracked exactly.
    pub prefix_length: u8,
    /// Keys in the ordered store.
    pub keys: u64,
    /// Sequence number of the last committed store batch.
    pub last_seq: u64,
    /// Bytes in the store's batch log.
    pub log_bytes: u64,
    /// Live corpus segments.
    pub segments: usize,
    /// Durable corpus bytes.
    pub storage_bytes: u64,
    /// Domains awaiting reclamation.
    pub pending_deletions: Vec<u32>,
    /// Ingestion channels with a committed offset.
    pub channels: usize,
    /// True while bulk-loaded data awaits `force_compaction`.
    pub bulk_pending: bool,
}

/// Persistent phrase index over aligned sentence pairs.
///
/// Opening a directory creates `index/` (ordered store) and `storage/`
/// (corpus segments) inside it. Ingestion goes through [`Self::put_batch`],
/// one caller at a time; queries may run concurrently with ingestion and
/// with each other.
pub struct PhraseIndex {
    path: PathBuf,
    options: IndexOptions,
    core: Arc<IndexCore>,
    gc: GarbageCollector,
    streams: Mutex<Streams>,
    ingest: Mutex<()>,
}

impl std::fmt::Debug for PhraseIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhraseIndex")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl PhraseIndex {
    /// Opens the index in `path`, creating its files when absent.
    ///
    /// The directory itself must exist. Persisted streams and the storage
    /// manifest are replayed, and the garbage collector is started when
    /// enabled.
    pub fn open(path: impl AsRef<Path>, options: IndexOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(PhraseError::invalid(format!(
                "model path {} is not an existing directory",
                path.display()
            )));
        }
        if options.prefix_length == 0 {
            return Err(PhraseError::invalid("prefix length must be at least 1"));
        }
        let codec = KeyCodec::new(options.prefix_length);
        let store = OrderedStore::open(
            path.join(INDEX_DIR),
            options.kv_options(),
            Arc::new(PositionMergeOperator),
        )?;
        for range in [source_prefix_range(), vec![TAG_TARGET_COUNT]] {
            if let Some((key, _)) = store.scan_prefix(&range).next() {
                let stored = stored_prefix_len(&key);
                if stored != Some(options.prefix_length) {
                    return Err(PhraseError::invalid(format!(
                        "index was built with prefix length {}, opened with {}",
                        stored.unwrap_or_default(),
                        options.prefix_length
                    )));
                }
            }
        }
        let streams = match store.get(&streams_key()) {
            Some(bytes) => Streams::decode(&bytes)?,
            None => Streams::new(),
        };
        let manifest = store
            .get(&manifest_key())
            .map(|bytes| StorageManifest::from_bytes(&bytes))
            .transpose()?;
        let storage = CorporaStorage::open(
            path.join(STORAGE_DIR),
            manifest.as_ref(),
            options.storage_options(),
        )?;
        let mut deleted = FxHashSet::default();
        for (key, _) in store.scan_prefix(&deleted_domain_prefix()) {
            if let Some(IndexKey::DeletedDomain(domain)) = codec.decode(&key)? {
                deleted.insert(domain);
            }
        }
        info!(
            path = %path.display(),
            prefix_length = options.prefix_length,
            channels = streams.len(),
            pending_deletions = deleted.len(),
            bulk_load = options.bulk_load,
            "index.open"
        );
        let core = Arc::new(IndexCore {
            store,
            storage,
            codec,
            manifest_lock: Mutex::new(()),
            deleted: RwLock::new(deleted),
            metrics: Arc::clone(&options.metrics),
            finalized: AtomicBool::new(true),
        });
        let mut gc = GarbageCollector::new(Arc::clone(&core), options.gc.clone());
        if options.gc.enabled {
            gc.start()?;
        }
        Ok(Self {
            path,
            options,
            core,
            gc,
            streams: Mutex::new(streams),
            ingest: Mutex::new(()),
        })
    }

    /// Stops the garbage collector, then syncs and releases the store and
    /// the corpus storage.
    pub fn close(self) -> Result<()> {
        let PhraseIndex { path, core, gc, .. } = self;
        if !core.is_finalized() {
            warn!(path = %path.display(), "index.close.bulk_not_finalized");
        }
        drop(gc);
        match Arc::try_unwrap(core) {
            Ok(core) => {
                core.store.sync()?;
                core.storage.close()?;
            }
            Err(core) => core.store.sync()?,
        }
        info!(path = %path.display(), "index.close");
        Ok(())
    }

    pub(crate) fn core(&self) -> &IndexCore {
        &self.core
    }

    /// Manifest as last committed to the store.
    pub(crate) fn stored_manifest(&self) -> Result<Option<StorageManifest>> {
        Ok(self
            .core
            .store
            .get(&manifest_key())
            .map(|bytes| StorageManifest::from_bytes(&bytes))
            .transpose()?)
    }

    /// Maximum phrase length tracked exactly.
    pub fn prefix_length(&self) -> u8 {
        self.options.prefix_length
    }

    /// Committed stream offsets.
    pub fn streams(&self) -> Streams {
        self.streams.lock().clone()
    }

    /// Domains whose deletion has been committed but not yet reclaimed.
    pub fn pending_deletions(&self) -> Vec<DomainId> {
        let mut domains: Vec<DomainId> = self.core.deleted.read().iter().copied().collect();
        domains.sort_unstable();
        domains
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.core.is_finalized() {
            Ok(())
        } else {
            Err(PhraseError::BulkLoadPending)
        }
    }

    /// Ingests `batch` atomically and returns the committed stream offsets.
    ///
    /// Entries of domains pending deletion, or deleted by this same batch,
    /// are skipped. On failure nothing is persisted, stream offsets stay
    /// where they were and appended sentences are truncated away.
    pub fn put_batch(&self, batch: &UpdateBatch) -> Result<Streams> {
        let streams = self.put_batch_locked(batch)?;
        self.compact_if_due();
        Ok(streams)
    }

    /// Snapshots the store when its log has outgrown the threshold. Runs
    /// with no index lock held; failures are logged and retried later.
    fn compact_if_due(&self) {
        match self.core.store.compact_if_due() {
            Ok(Some(keys)) => debug!(keys, "index.auto_compaction"),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "index.auto_compaction_failed"),
        }
    }

    fn put_batch_locked(&self, batch: &UpdateBatch) -> Result<Streams> {
        let _ingest = self.ingest.lock();
        let _manifest = self.core.manifest_lock.lock();
        for entry in batch.entries() {
            if entry.source.len() > usize::from(Length::MAX) {
                return Err(PhraseError::invalid(format!(
                    "source sentence of {} words exceeds the supported length",
                    entry.source.len()
                )));
            }
        }
        let mark = self.core.storage.mark();
        match self.commit(batch) {
            Ok((streams, new_deletions)) => {
                *self.streams.lock() = streams.clone();
                if !new_deletions.is_empty() {
                    self.core.deleted.write().extend(new_deletions);
                    self.gc.notify();
                }
                Ok(streams)
            }
            Err(err) => {
                if let Err(rollback) = self.core.storage.rollback(&mark) {
                    warn!(error = %rollback, "index.put_batch.rollback_failed");
                }
                self.core.metrics.batch_failed();
                Err(err)
            }
        }
    }

    fn commit(&self, batch: &UpdateBatch) -> Result<(Streams, Vec<DomainId>)> {
        let core = &self.core;
        let prefix_len = usize::from(core.codec.prefix_len());
        let pending = core.deleted_snapshot();
        let new_deletions: Vec<DomainId> = batch
            .deletions()
            .iter()
            .copied()
            .filter(|d| !pending.contains(d))
            .collect();
        let skip = |domain: &DomainId| pending.contains(domain) || batch.deletions().contains(domain);

        let mut prefixes: FxHashMap<Vec<u8>, PostingList> = FxHashMap::default();
        let mut counts: FxHashMap<Vec<u8>, i64> = FxHashMap::default();
        let mut ingested = 0u64;
        let mut skipped = 0u64;
        for entry in batch.entries() {
            if skip(&entry.domain) {
                skipped += 1;
                continue;
            }
            let location =
                core.storage
                    .append(entry.domain, &entry.source, &entry.target, &entry.alignment)?;
            for start in 0..entry.source.len() {
                let end = (start + prefix_len).min(entry.source.len());
                for stop in start + 1..=end {
                    let key = core.codec.source_prefix(entry.domain, &entry.source[start..stop]);
                    prefixes.entry(key).or_default().push(Posting {
                        domain: entry.domain,
                        location,
                        offset: start as Length,
                    });
                }
            }
            for start in 0..entry.target.len() {
                let end = (start + prefix_len).min(entry.target.len());
                for stop in start + 1..=end {
                    *counts
                        .entry(core.codec.target_count(&entry.target[start..stop]))
                        .or_default() += 1;
                }
            }
            ingested += 1;
        }

        let mut committed = self.streams.lock().clone();
        for (channel, position) in batch.streams().iter() {
            if committed.is_new(channel, position) {
                committed.set(channel, position);
            }
        }

        let keys = (prefixes.len() + counts.len()) as u64;
        let mut write = WriteBatch::new();
        for (key, list) in prefixes {
            write.merge(key, list.into_bytes());
        }
        for (key, count) in counts {
            write.merge(key, encode_counter(count));
        }
        for domain in &new_deletions {
            write.put(deleted_domain_key(*domain), DeletionProgress::initial().encode());
        }
        write.put(streams_key(), committed.encode());
        if self.options.bulk_load {
            core.finalized.store(false, Ordering::Release);
        } else {
            let manifest = core.storage.flush()?;
            write.put(manifest_key(), manifest.to_bytes()?);
        }
        let seq = core.store.write(write)?;
        core.metrics.batch_committed(ingested, keys);
        debug!(
            seq,
            entries = ingested,
            skipped,
            keys,
            deletions = new_deletions.len(),
            "index.put_batch.commit"
        );
        Ok((committed, new_deletions))
    }

    /// Counts occurrences of `phrase` on `side`.
    ///
    /// Phrases longer than the prefix length are not tracked and count 1.
    /// Source counts sum posting-list sizes over all live domains; target
    /// counts read the n-gram counter. The configured
    /// [`crate::index::CountFloor`] is applied to the result.
    pub fn count_occurrences(&self, side: Side, phrase: &[WordId]) -> Result<u64> {
        self.ensure_ready()?;
        if phrase.is_empty() {
            return Err(PhraseError::invalid("phrase must not be empty"));
        }
        if phrase.len() > usize::from(self.prefix_length()) {
            return Ok(1);
        }
        let count = match side {
            Side::Source => {
                self.core.metrics.count_query("source");
                let mut cursor = PrefixCursor::new(&self.core);
                cursor.seek(phrase)?;
                let mut total = 0u64;
                while cursor.has_next() {
                    total += cursor.count_value()?;
                    cursor.next()?;
                }
                i64::try_from(total).unwrap_or(i64::MAX)
            }
            Side::Target => {
                self.core.metrics.count_query("target");
                let key = self.core.codec.target_count(phrase);
                decode_counter(self.core.store.get(&key).as_deref())?
            }
        };
        Ok(self.options.count_floor.apply(count))
    }

    /// Samples up to `limit` sentence pairs containing `phrase`; `0` means
    /// no limit. See [`Collector::extend`].
    pub fn get_random_samples(
        &self,
        phrase: &[WordId],
        limit: usize,
        context: Option<&Context>,
        background: bool,
    ) -> Result<Vec<Sample>> {
        let mut collector = self.new_collector(context.cloned(), background)?;
        collector.extend(phrase, limit)
    }

    /// Creates a reusable sampler for incremental phrase extension.
    pub fn new_collector(&self, context: Option<Context>, background: bool) -> Result<Collector<'_>> {
        self.ensure_ready()?;
        Ok(Collector::new(
            &self.core,
            context,
            background,
            self.options.sample_cache_capacity,
        ))
    }

    /// Creates a single-pass iterator over every posting list and counter.
    pub fn new_iterator(&self) -> Result<IndexIterator<'_>> {
        self.ensure_ready()?;
        Ok(IndexIterator::new(&self.core))
    }

    /// Persists streams and manifest, then snapshots the store.
    ///
    /// Required after bulk loading before the index may be queried or
    /// reopened; safe to call at any time.
    pub fn force_compaction(&self) -> Result<()> {
        let _ingest = self.ingest.lock();
        let _manifest = self.core.manifest_lock.lock();
        let manifest = self.core.storage.flush()?;
        let mut write = WriteBatch::new();
        write.put(streams_key(), self.streams.lock().encode());
        write.put(manifest_key(), manifest.to_bytes()?);
        self.core.store.write(write)?;
        self.core.store.sync()?;
        let keys = self.core.store.compact()?;
        let was_pending = !self.core.finalized.swap(true, Ordering::AcqRel);
        if was_pending {
            self.gc.notify();
        }
        info!(keys, segments = manifest.segments.len(), finalized = was_pending, "index.force_compaction");
        Ok(())
    }

    /// Reclaims every pending deletion on the calling thread and returns
    /// the number of domains removed.
    pub fn collect_garbage(&self) -> Result<usize> {
        self.ensure_ready()?;
        self.gc.run_until_idle()
    }

    /// Store and storage counters.
    pub fn stats(&self) -> IndexStats {
        let store = self.core.store.stats();
        let manifest = self.core.storage.manifest();
        IndexStats {
            prefix_length: self.prefix_length(),
            keys: store.keys,
            last_seq: store.last_seq,
            log_bytes: store.log_bytes,
            segments: manifest.segments.len(),
            storage_bytes: manifest.total_bytes(),
            pending_deletions: self.pending_deletions().into_iter().map(u32::from).collect(),
            channels: self.streams.lock().len(),
            bulk_pending: !self.core.is_finalized(),
        }
    }
}
