#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use crate::primitives::bytes::buf::Cursor;
use crate::primitives::io::sync_dir;
use crate::types::{Checksum, Crc32Fast, IndexError};

const SNAPSHOT_MAGIC: [u8; 4] = *b"PIXS";
const SNAPSHOT_FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 24;
const TRAILER_LEN: usize = 4;

pub(crate) const SNAPSHOT_FILE: &str = "index.snap";
const SNAPSHOT_TMP_FILE: &str = "index.snap.tmp";

type Result<T> = std::result::Result<T, IndexError>;

/// Contents of a snapshot file.
pub(crate) struct Snapshot {
    pub seq: u64,
    pub entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// Writer that checksums everything it forwards.
struct Summed<W: Write> {
    inner: W,
    crc: Crc32Fast,
}

impl<W: Write> Summed<W> {
    fn put(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.crc.update(bytes);
        self.inner.write_all(bytes)
    }
}

/// Writes `entries` as the snapshot at sequence `seq`.
///
/// The file is built beside the live one and renamed over it, so a crash
/// leaves either the old or the new snapshot. Returns the entry count.
pub(crate) fn write<'a, I>(dir: &Path, seq: u64, count: u64, entries: I) -> Result<u64>
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let tmp = dir.join(SNAPSHOT_TMP_FILE);
    let file = File::create(&tmp)?;
    let mut out = Summed {
        inner: BufWriter::new(file),
        crc: Crc32Fast::default(),
    };
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&SNAPSHOT_MAGIC);
    header[4..6].copy_from_slice(&SNAPSHOT_FORMAT_VERSION.to_be_bytes());
    header[8..16].copy_from_slice(&seq.to_be_bytes());
    header[16..24].copy_from_slice(&count.to_be_bytes());
    out.put(&header)?;
    let mut written = 0u64;
    for (key, value) in entries {
        out.put(&(key.len() as u32).to_be_bytes())?;
        out.put(key)?;
        out.put(&(value.len() as u32).to_be_bytes())?;
        out.put(value)?;
        written += 1;
    }
    if written != count {
        return Err(IndexError::Corruption("snapshot entry count changed while writing"));
    }
    let crc = out.crc.finalize();
    let mut writer = out.inner;
    writer.write_all(&crc.to_be_bytes())?;
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, dir.join(SNAPSHOT_FILE))?;
    sync_dir(dir)?;
    Ok(written)
}

/// Loads the snapshot in `dir`, if one has been written.
pub(crate) fn load(dir: &Path) -> Result<Option<Snapshot>> {
    let bytes = match fs::read(dir.join(SNAPSHOT_FILE)) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if bytes.len() < HEADER_LEN + TRAILER_LEN {
        return Err(IndexError::Corruption("snapshot shorter than its header"));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
    let mut crc = Crc32Fast::default();
    crc.update(body);
    if crc.finalize().to_be_bytes() != trailer {
        return Err(IndexError::Corruption("snapshot checksum mismatch"));
    }
    const TRUNCATED: IndexError = IndexError::Corruption("snapshot truncated");
    let mut cur = Cursor::new(body);
    if cur.array::<4>() != Some(SNAPSHOT_MAGIC) {
        return Err(IndexError::Corruption("snapshot magic mismatch"));
    }
    if cur.u16() != Some(SNAPSHOT_FORMAT_VERSION) {
        return Err(IndexError::Corruption("snapshot format version mismatch"));
    }
    cur.take(2).ok_or(TRUNCATED)?;
    let seq = cur.u64().ok_or(TRUNCATED)?;
    let count = cur.u64().ok_or(TRUNCATED)?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let key = cur.len_prefixed().ok_or(TRUNCATED)?;
        let value = cur.len_prefixed().ok_or(TRUNCATED)?;
        entries.insert(key.to_vec(), value.to_vec());
    }
    if !cur.is_empty() {
        return Err(IndexError::Corruption("trailing bytes after snapshot entries"));
    }
    let _ = fs::remove_file(dir.join(SNAPSHOT_TMP_FILE));
    Ok(Some(Snapshot { seq, entries }))
}
