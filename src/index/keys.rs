//! Binary key layout of the phrase index.
//!
//! The first byte tags the key type. Phrase keys spell every word as a
//! `0x01` marker plus the big-endian word id and close the sequence with a
//! `0x00` terminator, so all keys of one exact phrase sort together and
//! ahead of every longer phrase that extends it:
//!
//! ```text
//! 0x00 source prefix   tag | prefix_len | (0x01 word)* | 0x00 | domain
//! 0x01 target count    tag | prefix_len | (0x01 word)* | 0x00
//! 0x02 streams         tag
//! 0x03 manifest        tag
//! 0x04 deleted domain  tag | domain
//! ```

use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::{DomainId, IndexError, WordId};

pub(crate) const TAG_SOURCE_PREFIX: u8 = 0x00;
pub(crate) const TAG_TARGET_COUNT: u8 = 0x01;
pub(crate) const TAG_STREAMS: u8 = 0x02;
pub(crate) const TAG_MANIFEST: u8 = 0x03;
pub(crate) const TAG_DELETED_DOMAIN: u8 = 0x04;

const WORD_MARKER: u8 = 0x01;
const TERMINATOR: u8 = 0x00;

/// Decoded form of an index key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexKey {
    /// Posting list of a source phrase within one domain.
    SourcePrefix {
        /// Owning domain.
        domain: DomainId,
        /// Phrase words.
        words: Vec<WordId>,
    },
    /// Domain-agnostic count of a target n-gram.
    TargetCount {
        /// N-gram words.
        words: Vec<WordId>,
    },
    /// Persisted ingestion stream offsets.
    Streams,
    /// Persisted corpus storage manifest.
    Manifest,
    /// Marker of a domain awaiting reclamation.
    DeletedDomain(DomainId),
}

pub(crate) fn streams_key() -> Vec<u8> {
    vec![TAG_STREAMS]
}

pub(crate) fn manifest_key() -> Vec<u8> {
    vec![TAG_MANIFEST]
}

pub(crate) fn deleted_domain_key(domain: DomainId) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    key.push(TAG_DELETED_DOMAIN);
    ord::put_u32(&mut key, domain.0);
    key
}

/// All deletion marker keys start with this prefix.
pub(crate) fn deleted_domain_prefix() -> Vec<u8> {
    vec![TAG_DELETED_DOMAIN]
}

/// All source prefix keys start with this prefix.
pub(crate) fn source_prefix_range() -> Vec<u8> {
    vec![TAG_SOURCE_PREFIX]
}

/// Reads the prefix-length byte of a phrase key, if the key is one.
pub(crate) fn stored_prefix_len(key: &[u8]) -> Option<u8> {
    match key {
        [TAG_SOURCE_PREFIX | TAG_TARGET_COUNT, len, ..] => Some(*len),
        _ => None,
    }
}

/// Encoder and decoder bound to one prefix length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyCodec {
    prefix_len: u8,
}

impl KeyCodec {
    /// Creates a codec for phrases of at most `prefix_len` words.
    pub fn new(prefix_len: u8) -> Self {
        Self { prefix_len }
    }

    /// Maximum phrase length tracked exactly.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    fn phrase(&self, tag: u8, words: &[WordId], extra: usize) -> Vec<u8> {
        let mut key = Vec::with_capacity(3 + words.len() * 5 + extra);
        key.push(tag);
        key.push(self.prefix_len);
        for &word in words {
            key.push(WORD_MARKER);
            ord::put_u32(&mut key, word);
        }
        key
    }

    /// Key of `words`' posting list in `domain`.
    pub fn source_prefix(&self, domain: DomainId, words: &[WordId]) -> Vec<u8> {
        let mut key = self.phrase(TAG_SOURCE_PREFIX, words, 5);
        key.push(TERMINATOR);
        ord::put_u32(&mut key, domain.0);
        key
    }

    /// Prefix shared by the posting lists of `words` in every domain.
    pub fn source_phrase(&self, words: &[WordId]) -> Vec<u8> {
        let mut key = self.phrase(TAG_SOURCE_PREFIX, words, 1);
        key.push(TERMINATOR);
        key
    }

    /// Key of the target n-gram counter for `words`.
    pub fn target_count(&self, words: &[WordId]) -> Vec<u8> {
        let mut key = self.phrase(TAG_TARGET_COUNT, words, 1);
        key.push(TERMINATOR);
        key
    }

    /// Decodes a raw key. Returns `Ok(None)` for an unknown tag.
    pub fn decode(&self, key: &[u8]) -> Result<Option<IndexKey>, IndexError> {
        let mut cur = Cursor::new(key);
        let Some(tag) = cur.u8() else {
            return Err(IndexError::Corruption("empty index key"));
        };
        let decoded = match tag {
            TAG_SOURCE_PREFIX => {
                let words = self.decode_words(&mut cur)?;
                let domain = cur
                    .u32()
                    .ok_or(IndexError::Corruption("source key missing domain"))?;
                IndexKey::SourcePrefix {
                    domain: DomainId(domain),
                    words,
                }
            }
            TAG_TARGET_COUNT => IndexKey::TargetCount {
                words: self.decode_words(&mut cur)?,
            },
            TAG_STREAMS => IndexKey::Streams,
            TAG_MANIFEST => IndexKey::Manifest,
            TAG_DELETED_DOMAIN => {
                let domain = cur
                    .u32()
                    .ok_or(IndexError::Corruption("deletion key missing domain"))?;
                IndexKey::DeletedDomain(DomainId(domain))
            }
            _ => return Ok(None),
        };
        if !cur.is_empty() {
            return Err(IndexError::Corruption("trailing bytes in index key"));
        }
        Ok(Some(decoded))
    }

    fn decode_words(&self, cur: &mut Cursor<'_>) -> Result<Vec<WordId>, IndexError> {
        match cur.u8() {
            Some(len) if len == self.prefix_len => {}
            Some(_) => return Err(IndexError::Corruption("key prefix length mismatch")),
            None => return Err(IndexError::Corruption("key missing prefix length")),
        }
        let mut words = Vec::new();
        loop {
            match cur.u8() {
                Some(WORD_MARKER) => {
                    let word = cur
                        .u32()
                        .ok_or(IndexError::Corruption("key word truncated"))?;
                    words.push(word);
                }
                Some(TERMINATOR) => break,
                Some(_) => return Err(IndexError::Corruption("bad word marker in key")),
                None => return Err(IndexError::Corruption("key missing terminator")),
            }
        }
        if words.is_empty() || words.len() > usize::from(self.prefix_len) {
            return Err(IndexError::Corruption("key phrase length out of range"));
        }
        Ok(words)
    }
}
