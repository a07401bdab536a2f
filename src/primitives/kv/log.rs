#![forbid(unsafe_code)]

use std::sync::Arc;

use tracing::{debug, warn};

use crate::primitives::io::FileIo;
use crate::types::{frame_crc32, IndexError};

const LOG_MAGIC: [u8; 4] = *b"PIXL";
const LOG_FORMAT_VERSION: u16 = 1;
pub(crate) const FILE_HEADER_LEN: usize = 16;
const FRAME_HEADER_LEN: usize = 16;

type Result<T> = std::result::Result<T, IndexError>;

#[derive(Clone, Copy, Debug)]
struct FileHeader {
    base_seq: u64,
}

impl FileHeader {
    fn encode(&self) -> [u8; FILE_HEADER_LEN] {
        let mut buf = [0u8; FILE_HEADER_LEN];
        buf[0..4].copy_from_slice(&LOG_MAGIC);
        buf[4..6].copy_from_slice(&LOG_FORMAT_VERSION.to_be_bytes());
        buf[8..16].copy_from_slice(&self.base_seq.to_be_bytes());
        buf
    }

    fn decode(src: &[u8; FILE_HEADER_LEN]) -> Result<Self> {
        if src[0..4] != LOG_MAGIC {
            return Err(IndexError::Corruption("batch log magic mismatch"));
        }
        let version = u16::from_be_bytes([src[4], src[5]]);
        if version != LOG_FORMAT_VERSION {
            return Err(IndexError::Corruption("batch log format version mismatch"));
        }
        if src[6..8] != [0, 0] {
            return Err(IndexError::Corruption(
                "batch log reserved header bytes non-zero",
            ));
        }
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&src[8..16]);
        Ok(Self {
            base_seq: u64::from_be_bytes(seq),
        })
    }
}

/// One committed write batch as stored in the log.
#[derive(Debug)]
pub(crate) struct LogFrame {
    pub seq: u64,
    pub payload: Vec<u8>,
}

/// Append-only log of encoded write batches.
///
/// Each frame is `seq:u64 | len:u32 | crc:u32 | payload`, the CRC covering
/// sequence, length and payload. Replay stops at the first frame that is
/// short, fails its CRC, or does not advance the sequence; everything from
/// that point is a torn tail and gets truncated.
pub(crate) struct BatchLog {
    io: Arc<dyn FileIo>,
    header: FileHeader,
    append_offset: u64,
    poisoned: bool,
}

impl BatchLog {
    pub fn open(io: Arc<dyn FileIo>) -> Result<Self> {
        let len = io.len()?;
        let header = if len < FILE_HEADER_LEN as u64 {
            let header = FileHeader { base_seq: 0 };
            io.write_at(0, &header.encode())?;
            io.truncate(FILE_HEADER_LEN as u64)?;
            io.sync_all()?;
            header
        } else {
            let mut buf = [0u8; FILE_HEADER_LEN];
            io.read_at(0, &mut buf)?;
            FileHeader::decode(&buf)?
        };
        Ok(Self {
            io,
            header,
            append_offset: FILE_HEADER_LEN as u64,
            poisoned: false,
        })
    }

    /// Writes a new log continuing from `base_seq` whose body is `frames`,
    /// bytes previously returned by [`Self::tail_from`].
    pub fn create(io: Arc<dyn FileIo>, base_seq: u64, frames: &[u8]) -> Result<Self> {
        let header = FileHeader { base_seq };
        let end = (FILE_HEADER_LEN + frames.len()) as u64;
        io.truncate(0)?;
        io.write_at(0, &header.encode())?;
        io.write_at(FILE_HEADER_LEN as u64, frames)?;
        io.sync_all()?;
        Ok(Self {
            io,
            header,
            append_offset: end,
            poisoned: false,
        })
    }

    /// Sequence number of the snapshot this log continues from.
    pub fn base_seq(&self) -> u64 {
        self.header.base_seq
    }

    /// Reads every valid frame and positions the append offset after them.
    pub fn replay(&mut self) -> Result<Vec<LogFrame>> {
        let end = self.io.len()?;
        let mut offset = FILE_HEADER_LEN as u64;
        let mut last_seq = self.header.base_seq;
        let mut frames = Vec::new();
        while offset + FRAME_HEADER_LEN as u64 <= end {
            let mut head = [0u8; FRAME_HEADER_LEN];
            self.io.read_at(offset, &mut head)?;
            let seq = u64::from_be_bytes(head[0..8].try_into().unwrap_or_default());
            let len = u32::from_be_bytes(head[8..12].try_into().unwrap_or_default());
            let stored_crc = u32::from_be_bytes(head[12..16].try_into().unwrap_or_default());
            let body_end = offset + FRAME_HEADER_LEN as u64 + u64::from(len);
            if seq <= last_seq || body_end > end {
                break;
            }
            let mut payload = vec![0u8; len as usize];
            self.io
                .read_at(offset + FRAME_HEADER_LEN as u64, &mut payload)?;
            if frame_crc32(&[&head[0..12], &payload]) != stored_crc {
                break;
            }
            frames.push(LogFrame { seq, payload });
            last_seq = seq;
            offset = body_end;
        }
        if offset < end {
            warn!(
                valid_up_to = offset,
                file_len = end,
                "kv.log.torn_tail_truncated"
            );
            self.io.truncate(offset)?;
            self.io.sync_all()?;
        }
        self.append_offset = offset;
        debug!(frames = frames.len(), "kv.log.replay");
        Ok(frames)
    }

    /// Appends one frame. A failed append rolls the file back to the prior end.
    pub fn append(&mut self, seq: u64, payload: &[u8]) -> Result<()> {
        if self.poisoned {
            return Err(IndexError::Corruption(
                "batch log poisoned by an earlier failed write",
            ));
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| IndexError::Corruption("write batch exceeds frame size limit"))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&seq.to_be_bytes());
        frame.extend_from_slice(&len.to_be_bytes());
        let crc = frame_crc32(&[&frame[0..12], payload]);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame.extend_from_slice(payload);
        if let Err(err) = self.io.write_at(self.append_offset, &frame) {
            self.rollback();
            return Err(err.into());
        }
        self.append_offset += frame.len() as u64;
        Ok(())
    }

    /// Drops the most recent frame after a failed sync.
    pub fn discard_last(&mut self, frame_start: u64) {
        self.append_offset = frame_start;
        self.rollback();
    }

    fn rollback(&mut self) {
        if let Err(err) = self.io.truncate(self.append_offset) {
            warn!(error = %err, "kv.log.rollback_failed");
            self.poisoned = true;
        }
    }

    /// Raw frames from `offset`, a value of [`Self::len`], to the end.
    pub fn tail_from(&self, offset: u64) -> Result<Vec<u8>> {
        let offset = offset.clamp(FILE_HEADER_LEN as u64, self.append_offset);
        let mut buf = vec![0u8; (self.append_offset - offset) as usize];
        self.io.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()?;
        Ok(())
    }

    /// Truncates every frame; the log now continues from `base_seq`.
    pub fn reset(&mut self, base_seq: u64) -> Result<()> {
        self.header = FileHeader { base_seq };
        self.io.write_at(0, &self.header.encode())?;
        self.io.truncate(FILE_HEADER_LEN as u64)?;
        self.io.sync_all()?;
        self.append_offset = FILE_HEADER_LEN as u64;
        self.poisoned = false;
        Ok(())
    }

    /// Bytes currently occupied by the log, header included.
    pub fn len(&self) -> u64 {
        self.append_offset
    }
}
