//! Low-level primitives the phrase index is built on.
//!
//! Includes byte encoders, positioned file I/O and the embedded ordered
//! key-value store.

/// Byte-level encoders and a bounds-checked reader.
pub mod bytes;

/// Positioned file I/O.
pub mod io;

/// Ordered key-value store with atomic write batches and a merge hook.
///
/// Durability comes from an append-only batch log plus snapshots written
/// during compaction.
pub mod kv;
