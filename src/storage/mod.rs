#![forbid(unsafe_code)]
//! Append-only corpus storage for aligned sentence pairs.
//!
//! Records live in per-domain segment files. A [`Location`] names a segment
//! and a byte offset inside it; the index stores locations in its posting
//! lists and resolves them here when sampling. The durable extent of every
//! segment is described by a [`StorageManifest`] that is committed in the
//! same write batch as the index data referencing it, so on open any bytes
//! past the manifest are discarded.

mod manifest;
mod segment;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::primitives::io::{remove_file_if_exists, sync_dir};
use crate::types::{
    DomainId, Length, Location, SegmentId, StorageError, WordId, MAX_LOCATION_OFFSET,
    MAX_SEGMENT_ID,
};

pub use manifest::{SegmentEntry, StorageManifest, MANIFEST_VERSION};
pub use segment::CorpusRecord;

use segment::{encode_record, parse_file_name, Segment};

type Result<T> = std::result::Result<T, StorageError>;

/// Tuning for [`CorporaStorage`].
#[derive(Clone, Debug)]
pub struct StorageOptions {
    /// Size at which a domain's active segment is closed and a new one started.
    pub max_segment_bytes: u64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            max_segment_bytes: 64 * 1024 * 1024,
        }
    }
}

struct StorageState {
    segments: BTreeMap<SegmentId, Arc<Segment>>,
    active: FxHashMap<DomainId, SegmentId>,
    next_segment: u32,
}

/// Segment lengths captured before a batch so a failed commit can undo its appends.
#[derive(Debug)]
pub struct StorageMark {
    lens: Vec<(SegmentId, u64)>,
    next_segment: u32,
}

/// Segments removed from the live set by [`CorporaStorage::detach_domain`].
pub struct DetachedSegments {
    domain: DomainId,
    segments: Vec<Arc<Segment>>,
}

impl DetachedSegments {
    /// Domain the segments belonged to.
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    /// Number of detached segment files.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true when the domain had no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Per-domain append-only store of aligned sentence pairs.
pub struct CorporaStorage {
    dir: PathBuf,
    options: StorageOptions,
    state: RwLock<StorageState>,
    created: AtomicBool,
}

impl CorporaStorage {
    /// Opens storage in `dir` and reconciles it with `manifest`.
    ///
    /// Listed segments are cut back to their durable size, unlisted segment
    /// files are deleted. A listed segment that is missing or short is
    /// corruption.
    pub fn open(
        dir: impl AsRef<Path>,
        manifest: Option<&StorageManifest>,
        options: StorageOptions,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let empty = StorageManifest::default();
        let manifest = manifest.unwrap_or(&empty);

        let mut segments = BTreeMap::new();
        let mut active: FxHashMap<DomainId, SegmentId> = FxHashMap::default();
        for entry in &manifest.segments {
            let seg = Segment::recover(&dir, entry.segment_id(), entry.domain_id(), entry.size)?;
            active.insert(seg.domain, seg.id);
            segments.insert(seg.id, Arc::new(seg));
        }

        let mut removed = 0usize;
        for dirent in std::fs::read_dir(&dir)? {
            let dirent = dirent?;
            let name = dirent.file_name();
            let Some(id) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            if !segments.contains_key(&id) {
                warn!(segment = id.0, "storage.open.orphan_segment_removed");
                remove_file_if_exists(dirent.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            sync_dir(&dir)?;
        }

        let next_segment = segments
            .keys()
            .next_back()
            .map_or(0, |id: &SegmentId| id.0 + 1)
            .max(manifest.next_segment);
        info!(
            dir = %dir.display(),
            segments = segments.len(),
            bytes = manifest.total_bytes(),
            orphans = removed,
            "storage.open"
        );
        Ok(Self {
            dir,
            options,
            state: RwLock::new(StorageState {
                segments,
                active,
                next_segment,
            }),
            created: AtomicBool::new(false),
        })
    }

    /// Appends an aligned pair to `domain`'s active segment.
    pub fn append(
        &self,
        domain: DomainId,
        source: &[WordId],
        target: &[WordId],
        alignment: &[(Length, Length)],
    ) -> Result<Location> {
        let frame = encode_record(domain, source, target, alignment);
        let segment = self.segment_for_append(domain, frame.len() as u64)?;
        let offset = segment.append(&frame)?;
        if offset > MAX_LOCATION_OFFSET {
            return Err(StorageError::Corruption("segment offset exceeds location range"));
        }
        Ok(Location::new(segment.id, offset))
    }

    fn segment_for_append(&self, domain: DomainId, frame_len: u64) -> Result<Arc<Segment>> {
        let fits = |seg: &Segment| {
            seg.len() == 0 || seg.len() + frame_len <= self.options.max_segment_bytes
        };
        {
            let state = self.state.read();
            if let Some(seg) = state.active.get(&domain).and_then(|id| state.segments.get(id)) {
                if fits(seg) {
                    return Ok(Arc::clone(seg));
                }
            }
        }
        let mut state = self.state.write();
        if let Some(seg) = state.active.get(&domain).and_then(|id| state.segments.get(id)) {
            if fits(seg) {
                return Ok(Arc::clone(seg));
            }
        }
        let id = state.next_segment;
        if id > MAX_SEGMENT_ID {
            return Err(StorageError::Corruption("segment id space exhausted"));
        }
        let seg = Arc::new(Segment::create(&self.dir, SegmentId(id), domain)?);
        state.next_segment = id + 1;
        state.segments.insert(seg.id, Arc::clone(&seg));
        state.active.insert(domain, seg.id);
        self.created.store(true, Ordering::Release);
        debug!(segment = id, domain = domain.0, "storage.segment.created");
        Ok(seg)
    }

    /// Reads the pair stored at `location`.
    pub fn read(&self, location: Location) -> Result<CorpusRecord> {
        let segment = self
            .state
            .read()
            .segments
            .get(&location.segment())
            .cloned()
            .ok_or(StorageError::UnknownLocation(location))?;
        match segment.read(location.offset(), segment.len())? {
            Some((record, _)) => Ok(record),
            None => Err(StorageError::UnknownLocation(location)),
        }
    }

    /// Fsyncs every segment with unflushed appends and returns the manifest
    /// describing the new durable extent.
    pub fn flush(&self) -> Result<StorageManifest> {
        let segments: Vec<Arc<Segment>> = self.state.read().segments.values().cloned().collect();
        let mut synced = 0usize;
        for seg in &segments {
            if seg.flush()? {
                synced += 1;
            }
        }
        if self.created.swap(false, Ordering::AcqRel) {
            if let Err(err) = sync_dir(&self.dir) {
                self.created.store(true, Ordering::Release);
                return Err(err.into());
            }
        }
        debug!(segments = synced, "storage.flush");
        Ok(self.manifest())
    }

    /// Manifest describing the durable extent of every live segment.
    pub fn manifest(&self) -> StorageManifest {
        let state = self.state.read();
        StorageManifest {
            version: MANIFEST_VERSION,
            next_segment: state.next_segment,
            segments: state
                .segments
                .values()
                .map(|seg| SegmentEntry {
                    id: seg.id.0,
                    domain: seg.domain.0,
                    size: seg.durable_len(),
                })
                .collect(),
        }
    }

    /// Captures current segment lengths.
    pub fn mark(&self) -> StorageMark {
        let state = self.state.read();
        StorageMark {
            lens: state
                .segments
                .values()
                .map(|seg| (seg.id, seg.len()))
                .collect(),
            next_segment: state.next_segment,
        }
    }

    /// Discards every append made since `mark` was taken.
    pub fn rollback(&self, mark: &StorageMark) -> Result<()> {
        let mut state = self.state.write();
        let lens: FxHashMap<SegmentId, u64> = mark.lens.iter().copied().collect();
        let created: Vec<SegmentId> = state
            .segments
            .keys()
            .copied()
            .filter(|id| id.0 >= mark.next_segment && !lens.contains_key(id))
            .collect();
        for id in created {
            if let Some(seg) = state.segments.remove(&id) {
                state.active.retain(|_, active| *active != id);
                remove_file_if_exists(&seg.path)?;
            }
        }
        for seg in state.segments.values() {
            if let Some(&len) = lens.get(&seg.id) {
                if seg.len() > len {
                    seg.truncate(len)?;
                }
            }
        }
        state.next_segment = mark.next_segment;
        debug!(next_segment = mark.next_segment, "storage.rollback");
        Ok(())
    }

    /// Segments currently holding `domain`'s records, in id order.
    pub fn domain_segments(&self, domain: DomainId) -> Vec<SegmentId> {
        self.state
            .read()
            .segments
            .values()
            .filter(|seg| seg.domain == domain)
            .map(|seg| seg.id)
            .collect()
    }

    /// Reads the durable record at `offset` in `segment`, returning it with
    /// the offset of the following record. `None` marks the end of the segment.
    pub fn read_durable(
        &self,
        segment: SegmentId,
        offset: u64,
    ) -> Result<Option<(CorpusRecord, u64)>> {
        let seg = self
            .state
            .read()
            .segments
            .get(&segment)
            .cloned()
            .ok_or(StorageError::UnknownLocation(Location::new(segment, 0)))?;
        seg.read(offset, seg.durable_len())
    }

    /// Durable records of `domain`, starting at (`segment`, `offset`).
    pub fn records(
        &self,
        domain: DomainId,
        segment: SegmentId,
        offset: u64,
    ) -> DomainRecords<'_> {
        let mut pending = self.domain_segments(domain);
        pending.retain(|id| *id >= segment);
        pending.reverse();
        DomainRecords {
            storage: self,
            pending,
            resume: Some((segment, offset)),
            current: None,
        }
    }

    /// Removes `domain`'s segments from the live set without deleting files.
    pub fn detach_domain(&self, domain: DomainId) -> DetachedSegments {
        let mut state = self.state.write();
        let ids: Vec<SegmentId> = state
            .segments
            .values()
            .filter(|seg| seg.domain == domain)
            .map(|seg| seg.id)
            .collect();
        let segments = ids
            .iter()
            .filter_map(|id| state.segments.remove(id))
            .collect();
        state.active.remove(&domain);
        DetachedSegments { domain, segments }
    }

    /// Puts detached segments back after a failed reclamation commit.
    pub fn reattach(&self, detached: DetachedSegments) {
        let mut state = self.state.write();
        for seg in detached.segments {
            state.segments.insert(seg.id, seg);
        }
    }

    /// Deletes the files of detached segments.
    pub fn remove_detached(&self, detached: DetachedSegments) -> Result<()> {
        for seg in &detached.segments {
            remove_file_if_exists(&seg.path)?;
        }
        if !detached.is_empty() {
            sync_dir(&self.dir)?;
        }
        info!(
            domain = detached.domain.0,
            segments = detached.len(),
            "storage.domain_removed"
        );
        Ok(())
    }

    /// Number of live segments.
    pub fn segment_count(&self) -> usize {
        self.state.read().segments.len()
    }

    /// Checks every durable record of every live segment; returns the record count.
    pub fn verify(&self) -> Result<u64> {
        let segments: Vec<Arc<Segment>> = self.state.read().segments.values().cloned().collect();
        let mut records = 0u64;
        for seg in segments {
            let limit = seg.durable_len();
            let mut offset = 0;
            while let Some((_, next)) = seg.read(offset, limit)? {
                records += 1;
                offset = next;
            }
            if offset != limit {
                return Err(StorageError::Corruption("trailing bytes after last record"));
            }
        }
        Ok(records)
    }

    /// Syncs all segment files and releases them.
    pub fn close(self) -> Result<()> {
        let state = self.state.into_inner();
        for seg in state.segments.values() {
            seg.sync()?;
        }
        debug!(segments = state.segments.len(), "storage.close");
        Ok(())
    }
}

/// Iterator over one domain's durable records; see [`CorporaStorage::records`].
pub struct DomainRecords<'a> {
    storage: &'a CorporaStorage,
    pending: Vec<SegmentId>,
    resume: Option<(SegmentId, u64)>,
    current: Option<(SegmentId, u64)>,
}

impl Iterator for DomainRecords<'_> {
    /// A record with the position right after it.
    type Item = Result<(CorpusRecord, SegmentId, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (segment, offset) = match self.current {
                Some(pos) => pos,
                None => {
                    let id = self.pending.pop()?;
                    let offset = match self.resume.take() {
                        Some((seg, off)) if seg == id => off,
                        _ => 0,
                    };
                    (id, offset)
                }
            };
            match self.storage.read_durable(segment, offset) {
                Ok(Some((record, next))) => {
                    self.current = Some((segment, next));
                    return Some(Ok((record, segment, next)));
                }
                Ok(None) => self.current = None,
                Err(err) => {
                    self.pending.clear();
                    self.current = None;
                    return Some(Err(err));
                }
            }
        }
    }
}
