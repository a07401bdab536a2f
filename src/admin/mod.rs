#![forbid(unsafe_code)]

//! Index administration and maintenance utilities.
//!
//! Every entry point opens the index with the background collector
//! disabled, does its work synchronously and closes the index again.

mod collect;
mod compact;
mod error;
mod options;
mod stats;
mod util;
mod verify;

/// Synchronous reclamation of deleted domains.
pub use collect::{collect_garbage, CollectReport};

/// Store snapshotting, also used to finalize bulk loads.
pub use compact::{compact, CompactReport};

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Configuration options for opening an index in admin mode.
pub use options::AdminOpenOptions;

/// Statistics collection and reporting.
pub use stats::{stats, FilesystemStats, StatsReport, StreamSection};

/// Index integrity verification.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};

/// Utility for opening an index with admin options.
pub use util::open_index;
