#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::primitives::bytes::{buf::Cursor, ord};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{frame_crc32, Alignment, DomainId, Length, SegmentId, StorageError, WordId};

pub(crate) const RECORD_HEADER_LEN: u64 = 8;

const FILE_PREFIX: &str = "segment-";
const FILE_SUFFIX: &str = ".dat";

/// Aligned sentence pair read back from corpus storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorpusRecord {
    /// Domain the pair was ingested into.
    pub domain: DomainId,
    /// Source sentence.
    pub source: Vec<WordId>,
    /// Target sentence.
    pub target: Vec<WordId>,
    /// Word alignment between the two.
    pub alignment: Alignment,
}

pub(crate) fn file_name(id: SegmentId) -> String {
    format!("{FILE_PREFIX}{}{FILE_SUFFIX}", id.0)
}

pub(crate) fn parse_file_name(name: &str) -> Option<SegmentId> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
        .map(SegmentId)
}

/// Encodes one record frame: `len:u32 | crc:u32 | payload`.
pub(crate) fn encode_record(
    domain: DomainId,
    source: &[WordId],
    target: &[WordId],
    alignment: &[(Length, Length)],
) -> Vec<u8> {
    let payload_len = 16 + 4 * (source.len() + target.len() + alignment.len());
    let mut out = Vec::with_capacity(RECORD_HEADER_LEN as usize + payload_len);
    out.extend_from_slice(&[0u8; RECORD_HEADER_LEN as usize]);
    ord::put_u32(&mut out, domain.0);
    for words in [source, target] {
        ord::put_u32(&mut out, words.len() as u32);
        for &w in words {
            ord::put_u32(&mut out, w);
        }
    }
    ord::put_u32(&mut out, alignment.len() as u32);
    for &(s, t) in alignment {
        ord::put_u16(&mut out, s);
        ord::put_u16(&mut out, t);
    }
    let body_len = (out.len() - RECORD_HEADER_LEN as usize) as u32;
    let crc = frame_crc32(&[&out[RECORD_HEADER_LEN as usize..]]);
    out[0..4].copy_from_slice(&body_len.to_be_bytes());
    out[4..8].copy_from_slice(&crc.to_be_bytes());
    out
}

fn read_words(cur: &mut Cursor<'_>) -> Option<Vec<WordId>> {
    let n = cur.u32()? as usize;
    if n > cur.remaining() / 4 {
        return None;
    }
    (0..n).map(|_| cur.u32()).collect()
}

fn decode_payload(payload: &[u8]) -> Option<CorpusRecord> {
    let mut cur = Cursor::new(payload);
    let domain = DomainId(cur.u32()?);
    let source = read_words(&mut cur)?;
    let target = read_words(&mut cur)?;
    let pairs = cur.u32()? as usize;
    if pairs > cur.remaining() / 4 {
        return None;
    }
    let alignment = (0..pairs)
        .map(|_| Some((cur.u16()?, cur.u16()?)))
        .collect::<Option<Alignment>>()?;
    if !cur.is_empty() {
        return None;
    }
    Some(CorpusRecord {
        domain,
        source,
        target,
        alignment,
    })
}

/// One append-only segment file.
///
/// `len` is the end of the last appended record; `durable` the prefix that
/// has been fsynced and may be published in a manifest.
pub(crate) struct Segment {
    pub id: SegmentId,
    pub domain: DomainId,
    pub path: PathBuf,
    io: StdFileIo,
    append: Mutex<()>,
    len: AtomicU64,
    durable: AtomicU64,
}

impl Segment {
    pub fn create(dir: &Path, id: SegmentId, domain: DomainId) -> Result<Self, StorageError> {
        let path = dir.join(file_name(id));
        let io = StdFileIo::open(&path)?;
        io.truncate(0)?;
        Ok(Self::with_len(id, domain, path, io, 0))
    }

    /// Opens a segment listed in the manifest, discarding bytes past `size`.
    pub fn recover(
        dir: &Path,
        id: SegmentId,
        domain: DomainId,
        size: u64,
    ) -> Result<Self, StorageError> {
        let path = dir.join(file_name(id));
        let io = match StdFileIo::open_existing(&path) {
            Ok(io) => io,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::Corruption("manifest lists a missing segment"));
            }
            Err(err) => return Err(err.into()),
        };
        let on_disk = io.len()?;
        if on_disk < size {
            return Err(StorageError::Corruption(
                "segment shorter than its manifest size",
            ));
        }
        if on_disk > size {
            io.truncate(size)?;
            io.sync_all()?;
        }
        Ok(Self::with_len(id, domain, path, io, size))
    }

    fn with_len(id: SegmentId, domain: DomainId, path: PathBuf, io: StdFileIo, len: u64) -> Self {
        Self {
            id,
            domain,
            path,
            io,
            append: Mutex::new(()),
            len: AtomicU64::new(len),
            durable: AtomicU64::new(len),
        }
    }

    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    pub fn durable_len(&self) -> u64 {
        self.durable.load(Ordering::Acquire)
    }

    /// Writes `frame` at the tail and returns its offset.
    pub fn append(&self, frame: &[u8]) -> Result<u64, StorageError> {
        let _guard = self.append.lock();
        let offset = self.len();
        self.io.write_at(offset, frame)?;
        self.len.store(offset + frame.len() as u64, Ordering::Release);
        Ok(offset)
    }

    /// Fsyncs appended bytes and publishes them as durable.
    pub fn flush(&self) -> Result<bool, StorageError> {
        let _guard = self.append.lock();
        let len = self.len();
        if len == self.durable_len() {
            return Ok(false);
        }
        self.io.sync_all()?;
        self.durable.store(len, Ordering::Release);
        Ok(true)
    }

    /// Cuts the segment back to `len` bytes.
    pub fn truncate(&self, len: u64) -> Result<(), StorageError> {
        let _guard = self.append.lock();
        self.io.truncate(len)?;
        self.len.store(len, Ordering::Release);
        if self.durable_len() > len {
            self.io.sync_all()?;
            self.durable.store(len, Ordering::Release);
        }
        Ok(())
    }

    /// Reads the record at `offset`, returning it with the next record offset.
    ///
    /// Only bytes below `limit` are considered part of the segment.
    pub fn read(&self, offset: u64, limit: u64) -> Result<Option<(CorpusRecord, u64)>, StorageError> {
        if offset + RECORD_HEADER_LEN > limit {
            return Ok(None);
        }
        let mut head = [0u8; RECORD_HEADER_LEN as usize];
        self.io.read_at(offset, &mut head)?;
        let mut cur = Cursor::new(&head);
        let (len, crc) = match (cur.u32(), cur.u32()) {
            (Some(len), Some(crc)) => (u64::from(len), crc),
            _ => return Err(StorageError::Corruption("record header unreadable")),
        };
        let end = offset + RECORD_HEADER_LEN + len;
        if end > limit {
            return Err(StorageError::Corruption("record extends past segment end"));
        }
        let mut payload = vec![0u8; len as usize];
        self.io.read_at(offset + RECORD_HEADER_LEN, &mut payload)?;
        if frame_crc32(&[&payload]) != crc {
            return Err(StorageError::Corruption("record checksum mismatch"));
        }
        let record =
            decode_payload(&payload).ok_or(StorageError::Corruption("record payload malformed"))?;
        Ok(Some((record, end)))
    }

    pub fn sync(&self) -> Result<(), StorageError> {
        self.io.sync_all()?;
        Ok(())
    }
}
