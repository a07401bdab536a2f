use rustc_hash::FxHashSet;

use crate::index::keys::IndexKey;
use crate::index::phrase_index::IndexCore;
use crate::index::postings::{posting_count, PostingList};
use crate::primitives::kv::StoreIter;
use crate::types::{DomainId, IndexError, Result, WordId};

/// Walks the per-domain posting lists of one exact source phrase.
///
/// Domains pending deletion are skipped. The deleted set is captured when
/// the cursor is created.
pub(crate) struct PrefixCursor<'a> {
    core: &'a IndexCore,
    deleted: FxHashSet<DomainId>,
    iter: Option<StoreIter<'a>>,
    current: Option<(DomainId, Vec<u8>)>,
}

impl<'a> PrefixCursor<'a> {
    pub fn new(core: &'a IndexCore) -> Self {
        Self {
            core,
            deleted: core.deleted_snapshot(),
            iter: None,
            current: None,
        }
    }

    /// Positions the cursor on the first live domain holding `phrase`.
    pub fn seek(&mut self, phrase: &[WordId]) -> Result<()> {
        let prefix = self.core.codec.source_phrase(phrase);
        self.iter = Some(self.core.store.scan_prefix(&prefix));
        self.next()
    }

    pub fn has_next(&self) -> bool {
        self.current.is_some()
    }

    /// Advances to the next live domain.
    pub fn next(&mut self) -> Result<()> {
        self.current = None;
        let Some(iter) = self.iter.as_mut() else {
            return Ok(());
        };
        for (key, value) in iter.by_ref() {
            match self.core.codec.decode(&key)? {
                Some(IndexKey::SourcePrefix { domain, .. }) => {
                    if self.deleted.contains(&domain) {
                        continue;
                    }
                    self.current = Some((domain, value));
                    return Ok(());
                }
                _ => return Err(IndexError::Corruption("non-posting key in phrase range").into()),
            }
        }
        self.iter = None;
        Ok(())
    }

    pub fn domain(&self) -> Option<DomainId> {
        self.current.as_ref().map(|(domain, _)| *domain)
    }

    /// Number of postings at the current position; 0 when exhausted.
    pub fn count_value(&self) -> Result<u64> {
        match &self.current {
            Some((_, value)) => Ok(posting_count(value)?),
            None => Ok(0),
        }
    }

    /// Posting list at the current position.
    pub fn postings(&self) -> Result<PostingList> {
        match &self.current {
            Some((_, value)) => Ok(PostingList::from_bytes(value.clone())?),
            None => Ok(PostingList::new()),
        }
    }
}
