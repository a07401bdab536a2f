#![forbid(unsafe_code)]

//! Phrase index over aligned sentence pairs.
//!
//! Source phrases of up to `prefix_length` words are indexed per domain with
//! posting lists pointing into corpus storage; target n-grams of the same
//! length are counted across domains. Both live in one ordered key-value
//! store whose merge operator folds posting lists and counters at commit
//! time. Deleted domains are reclaimed by a background collector.

mod batch;
mod collector;
mod cursor;
mod gc;
mod iterator;
mod keys;
mod merge;
mod metrics;
mod options;
mod phrase_index;
mod postings;

pub use batch::{CorpusEntry, UpdateBatch};
pub use collector::{Collector, Context, Sample};
pub use iterator::{IndexEntry, IndexIterator};
pub use keys::{IndexKey, KeyCodec};
pub use merge::PositionMergeOperator;
pub use metrics::{default_metrics, CounterMetrics, IndexMetrics, NoopMetrics};
pub use options::{CountFloor, GcCfg, IndexOptions, DEFAULT_PREFIX_LENGTH};
pub use phrase_index::{IndexStats, PhraseIndex};
pub use postings::{decode_counter, encode_counter, Posting, PostingList, Streams, POSTING_LEN};
