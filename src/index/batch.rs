use crate::index::postings::Streams;
use crate::types::{Alignment, ChannelId, DomainId, StreamPosition, WordId};

/// One aligned sentence pair to ingest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorpusEntry {
    /// Domain the pair belongs to.
    pub domain: DomainId,
    /// Source sentence.
    pub source: Vec<WordId>,
    /// Target sentence.
    pub target: Vec<WordId>,
    /// Word alignment between source and target.
    pub alignment: Alignment,
}

impl CorpusEntry {
    /// Bundles an aligned pair.
    pub fn new(
        domain: impl Into<DomainId>,
        source: Vec<WordId>,
        target: Vec<WordId>,
        alignment: Alignment,
    ) -> Self {
        Self {
            domain: domain.into(),
            source,
            target,
            alignment,
        }
    }
}

/// Entries and domain deletions to commit together with new stream offsets.
///
/// Data is tagged with the channel position it was read from; positions at
/// or below the channel's last committed offset are ignored so replaying an
/// ingestion stream after a crash is harmless.
#[derive(Clone, Debug)]
pub struct UpdateBatch {
    streams: Streams,
    entries: Vec<CorpusEntry>,
    deletions: Vec<DomainId>,
}

impl UpdateBatch {
    /// Starts a batch on top of the committed `streams`.
    pub fn new(streams: &Streams) -> Self {
        Self {
            streams: streams.clone(),
            entries: Vec::new(),
            deletions: Vec::new(),
        }
    }

    fn advance(&mut self, channel: ChannelId, position: StreamPosition) -> bool {
        if !self.streams.is_new(channel, position) {
            return false;
        }
        self.streams.set(channel, position);
        true
    }

    /// Queues `entry` read at `position` of `channel`. Returns `false` when
    /// the position was already consumed.
    pub fn add(&mut self, channel: ChannelId, position: StreamPosition, entry: CorpusEntry) -> bool {
        if !self.advance(channel, position) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Queues deletion of `domain` read at `position` of `channel`. Returns
    /// `false` when the position was already consumed.
    pub fn delete(
        &mut self,
        channel: ChannelId,
        position: StreamPosition,
        domain: impl Into<DomainId>,
    ) -> bool {
        if !self.advance(channel, position) {
            return false;
        }
        let domain = domain.into();
        if !self.deletions.contains(&domain) {
            self.deletions.push(domain);
        }
        true
    }

    /// Queued entries.
    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    /// Queued deletions.
    pub fn deletions(&self) -> &[DomainId] {
        &self.deletions
    }

    /// Stream offsets this batch commits.
    pub fn streams(&self) -> &Streams {
        &self.streams
    }

    /// Returns true when neither entries nor deletions are queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.deletions.is_empty()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
