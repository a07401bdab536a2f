//! Value encodings: posting lists, counters and stream offsets.

use std::collections::BTreeMap;

use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::{ChannelId, DomainId, IndexError, Length, Location, StreamPosition};

/// Encoded size of one [`Posting`].
pub const POSTING_LEN: usize = 14;

/// One occurrence of a source phrase.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Posting {
    /// Domain of the sentence.
    pub domain: DomainId,
    /// Storage location of the sentence pair.
    pub location: Location,
    /// Word index at which the phrase starts.
    pub offset: Length,
}

impl Posting {
    fn encode_into(&self, out: &mut Vec<u8>) {
        ord::put_u32(out, self.domain.0);
        ord::put_u64(out, self.location.raw());
        ord::put_u16(out, self.offset);
    }

    fn decode(chunk: &[u8]) -> Option<Self> {
        let mut cur = Cursor::new(chunk);
        Some(Posting {
            domain: DomainId(cur.u32()?),
            location: Location::from_raw(cur.u64()?),
            offset: cur.u16()?,
        })
    }
}

/// Serialized posting list.
///
/// The encoding is a plain concatenation of fixed-width postings, so
/// appending a list is appending its bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostingList {
    bytes: Vec<u8>,
}

impl PostingList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps stored bytes, checking they hold whole postings.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, IndexError> {
        if bytes.len() % POSTING_LEN != 0 {
            return Err(IndexError::Corruption(
                "posting list length not a multiple of posting size",
            ));
        }
        Ok(Self { bytes })
    }

    /// Appends one posting.
    pub fn push(&mut self, posting: Posting) {
        posting.encode_into(&mut self.bytes);
    }

    /// Appends every posting of `other`.
    pub fn append(&mut self, other: &PostingList) {
        self.bytes.extend_from_slice(&other.bytes);
    }

    /// Number of postings.
    pub fn len(&self) -> usize {
        self.bytes.len() / POSTING_LEN
    }

    /// Returns true when the list holds no postings.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Postings in stored order.
    pub fn iter(&self) -> impl Iterator<Item = Posting> + '_ {
        self.bytes.chunks_exact(POSTING_LEN).filter_map(Posting::decode)
    }

    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the list, returning its encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl FromIterator<Posting> for PostingList {
    fn from_iter<I: IntoIterator<Item = Posting>>(iter: I) -> Self {
        let mut list = PostingList::new();
        for posting in iter {
            list.push(posting);
        }
        list
    }
}

/// Number of postings encoded in `bytes`, validating the length.
pub(crate) fn posting_count(bytes: &[u8]) -> Result<u64, IndexError> {
    if bytes.len() % POSTING_LEN != 0 {
        return Err(IndexError::Corruption(
            "posting list length not a multiple of posting size",
        ));
    }
    Ok((bytes.len() / POSTING_LEN) as u64)
}

/// Encodes a counter value.
pub fn encode_counter(value: i64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decodes a stored counter; an absent value is zero.
pub fn decode_counter(value: Option<&[u8]>) -> Result<i64, IndexError> {
    match value {
        None => Ok(0),
        Some(bytes) => bytes
            .try_into()
            .map(i64::from_be_bytes)
            .map_err(|_| IndexError::Corruption("counter value is not 8 bytes")),
    }
}

/// Last consumed position per ingestion channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Streams {
    positions: BTreeMap<ChannelId, StreamPosition>,
}

impl Streams {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last consumed position of `channel`.
    pub fn get(&self, channel: ChannelId) -> Option<StreamPosition> {
        self.positions.get(&channel).copied()
    }

    /// Records `position` as consumed on `channel`.
    pub fn set(&mut self, channel: ChannelId, position: StreamPosition) {
        self.positions.insert(channel, position);
    }

    /// Returns true when `position` has not yet been consumed on `channel`.
    pub fn is_new(&self, channel: ChannelId, position: StreamPosition) -> bool {
        self.get(channel).map_or(true, |last| position > last)
    }

    /// Channels and positions in channel order.
    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, StreamPosition)> + '_ {
        self.positions.iter().map(|(&c, &p)| (c, p))
    }

    /// Number of tracked channels.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true when no channel has been consumed.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Serializes as `count:u32` followed by `(channel:u16, position:i64)` pairs.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.positions.len() * 10);
        ord::put_u32(&mut out, self.positions.len() as u32);
        for (&channel, &position) in &self.positions {
            ord::put_u16(&mut out, channel);
            ord::put_i64(&mut out, position);
        }
        out
    }

    /// Parses the value stored under the streams key.
    pub fn decode(bytes: &[u8]) -> Result<Self, IndexError> {
        const TRUNCATED: IndexError = IndexError::Corruption("streams value truncated");
        let mut cur = Cursor::new(bytes);
        let count = cur.u32().ok_or(TRUNCATED)?;
        let mut streams = Streams::new();
        for _ in 0..count {
            let channel = cur.u16().ok_or(TRUNCATED)?;
            let position = cur.i64().ok_or(TRUNCATED)?;
            streams.set(channel, position);
        }
        if !cur.is_empty() {
            return Err(IndexError::Corruption("trailing bytes in streams value"));
        }
        Ok(streams)
    }
}

impl FromIterator<(ChannelId, StreamPosition)> for Streams {
    fn from_iter<I: IntoIterator<Item = (ChannelId, StreamPosition)>>(iter: I) -> Self {
        Streams {
            positions: iter.into_iter().collect(),
        }
    }
}
