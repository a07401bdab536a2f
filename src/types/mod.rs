#![forbid(unsafe_code)]
//! Identifiers, sentence aliases and the error types shared across layers.

use std::fmt;
use std::io;

mod checksum;

pub use checksum::{frame_crc32, Checksum, Crc32Fast};

/// Vocabulary entry identifier produced by the upstream tokenizer.
pub type WordId = u32;

/// Position of a word inside a sentence.
pub type Length = u16;

/// Word alignment as `(source index, target index)` pairs.
pub type Alignment = Vec<(Length, Length)>;

/// Identifier of an ingestion channel.
pub type ChannelId = u16;

/// Offset consumed within an ingestion channel.
pub type StreamPosition = i64;

/// Logical corpus partition, deletable as a unit.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct DomainId(pub u32);

/// Identifier of a corpus storage segment file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SegmentId(pub u32);

/// Which side of the bitext a phrase belongs to.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Side {
    /// Source-language phrases, indexed per domain with postings.
    Source,
    /// Target-language n-grams, counted across all domains.
    Target,
}

const LOCATION_OFFSET_BITS: u32 = 40;
const LOCATION_OFFSET_MASK: u64 = (1 << LOCATION_OFFSET_BITS) - 1;

/// Largest segment identifier representable inside a [`Location`].
pub(crate) const MAX_SEGMENT_ID: u32 = (1 << (64 - LOCATION_OFFSET_BITS)) - 1;

/// Largest byte offset representable inside a [`Location`].
pub(crate) const MAX_LOCATION_OFFSET: u64 = LOCATION_OFFSET_MASK;

/// Opaque, stable reference to a sentence pair in corpus storage.
///
/// Issued only by [`crate::storage::CorporaStorage::append`]; callers can
/// compare and hash locations but cannot derive new ones.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Location(u64);

impl Location {
    pub(crate) fn new(segment: SegmentId, offset: u64) -> Self {
        debug_assert!(segment.0 <= MAX_SEGMENT_ID);
        debug_assert!(offset <= MAX_LOCATION_OFFSET);
        Location((u64::from(segment.0) << LOCATION_OFFSET_BITS) | offset)
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        Location(raw)
    }

    pub(crate) fn raw(self) -> u64 {
        self.0
    }

    pub(crate) fn segment(self) -> SegmentId {
        SegmentId((self.0 >> LOCATION_OFFSET_BITS) as u32)
    }

    pub(crate) fn offset(self) -> u64 {
        self.0 & LOCATION_OFFSET_MASK
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.segment().0, self.offset())
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DomainId {
    fn from(value: u32) -> Self {
        DomainId(value)
    }
}

impl From<DomainId> for u32 {
    fn from(value: DomainId) -> Self {
        value.0
    }
}

/// Faults raised by the key-value index layer.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The backing medium failed.
    #[error("index I/O: {0}")]
    Io(#[from] io::Error),
    /// A key, value or log frame does not decode.
    #[error("index corruption: {0}")]
    Corruption(&'static str),
    /// The merge operator refused an operand for this key type.
    #[error("merge declined for key type {tag:#04x}")]
    MergeDeclined {
        /// Leading tag byte of the rejected key.
        tag: u8,
    },
}

/// Faults raised by the corpus storage layer.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// The backing medium failed.
    #[error("storage I/O: {0}")]
    Io(#[from] io::Error),
    /// A record, segment or manifest does not decode.
    #[error("storage corruption: {0}")]
    Corruption(&'static str),
    /// The manifest could not be parsed.
    #[error("storage manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    /// No live segment holds the requested location.
    #[error("unknown storage location {0}")]
    UnknownLocation(Location),
}

/// Top-level error returned by [`crate::index::PhraseIndex`].
#[derive(thiserror::Error, Debug)]
pub enum PhraseError {
    /// Key-value index fault.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Corpus storage fault.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A bulk-loaded index was queried before `force_compaction`.
    #[error("bulk-loaded index must be finalized with force_compaction before use")]
    BulkLoadPending,
}

/// Result alias for the public index API.
pub type Result<T> = std::result::Result<T, PhraseError>;

impl PhraseError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        PhraseError::InvalidArgument(message.into())
    }
}
