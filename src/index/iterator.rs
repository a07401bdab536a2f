use crate::index::keys::IndexKey;
use crate::index::phrase_index::IndexCore;
use crate::index::postings::{decode_counter, Posting, PostingList};
use crate::primitives::kv::StoreIter;
use crate::types::{DomainId, Result, Side, WordId};

/// One logical index entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    /// Side the phrase belongs to.
    pub side: Side,
    /// Owning domain; `None` for target counters.
    pub domain: Option<DomainId>,
    /// Phrase words.
    pub words: Vec<WordId>,
    /// Occurrences; empty for target counters.
    pub positions: Vec<Posting>,
    /// Posting count for source entries, stored counter for target entries.
    pub count: i64,
}

/// Single-pass scan over every posting list and n-gram counter.
///
/// Bookkeeping keys (streams, manifest, deletion markers) are skipped.
/// Entries of domains pending deletion are still reported until the
/// garbage collector removes them.
pub struct IndexIterator<'a> {
    core: &'a IndexCore,
    inner: StoreIter<'a>,
}

impl<'a> IndexIterator<'a> {
    pub(crate) fn new(core: &'a IndexCore) -> Self {
        Self {
            core,
            inner: core.store.iter(),
        }
    }

    fn decode(&self, key: &[u8], value: Vec<u8>) -> Result<Option<IndexEntry>> {
        let entry = match self.core.codec.decode(key)? {
            Some(IndexKey::SourcePrefix { domain, words }) => {
                let positions: Vec<Posting> = PostingList::from_bytes(value)?.iter().collect();
                IndexEntry {
                    side: Side::Source,
                    domain: Some(domain),
                    words,
                    count: positions.len() as i64,
                    positions,
                }
            }
            Some(IndexKey::TargetCount { words }) => IndexEntry {
                side: Side::Target,
                domain: None,
                words,
                positions: Vec::new(),
                count: decode_counter(Some(&value))?,
            },
            _ => return Ok(None),
        };
        Ok(Some(entry))
    }
}

impl Iterator for IndexIterator<'_> {
    type Item = Result<IndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, value) = self.inner.next()?;
            match self.decode(&key, value) {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
