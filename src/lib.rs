//! Persistent phrase index for sampling aligned sentence pairs.
//!
//! Corpus storage keeps the sentence pairs; the index maps source phrases to
//! their occurrences per domain and counts target n-grams. See
//! [`index::PhraseIndex`] for the entry point.

#![warn(missing_docs)]

pub mod admin;
pub mod index;
pub mod primitives;
pub mod storage;
pub mod types;

pub use index::{
    Collector, Context, CorpusEntry, CountFloor, GcCfg, IndexOptions, PhraseIndex, Sample,
    Streams, UpdateBatch,
};
pub use types::{
    Alignment, ChannelId, DomainId, Length, Location, PhraseError, Result, Side, StreamPosition,
    WordId,
};
