use crate::index::{CountFloor, GcCfg, IndexOptions, DEFAULT_PREFIX_LENGTH};

/// Common options used when opening an index for administrative commands.
#[derive(Clone, Debug)]
pub struct AdminOpenOptions {
    /// Prefix length the index was built with.
    pub prefix_length: u8,
    /// Whether to create the index directory if it doesn't exist.
    pub create_if_missing: bool,
    /// Keys touched per garbage collection cycle.
    pub gc_batch_size: usize,
    /// Fsync the batch log on every commit.
    pub sync_writes: bool,
    /// Floor applied to reported counts.
    pub count_floor: CountFloor,
}

impl Default for AdminOpenOptions {
    fn default() -> Self {
        Self {
            prefix_length: DEFAULT_PREFIX_LENGTH,
            create_if_missing: false,
            gc_batch_size: GcCfg::default().batch_size,
            sync_writes: true,
            count_floor: CountFloor::default(),
        }
    }
}

impl AdminOpenOptions {
    /// Index options for an admin session. The background collector stays
    /// off; admin commands drive collection themselves.
    pub fn index_options(&self) -> IndexOptions {
        IndexOptions::new(self.prefix_length)
            .gc_enabled(false)
            .gc_batch_size(self.gc_batch_size)
            .sync_writes(self.sync_writes)
            .count_floor(self.count_floor)
    }
}
