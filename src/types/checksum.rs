#![forbid(unsafe_code)]

/// Incremental checksum used by every on-disk frame.
pub trait Checksum {
    /// Clears accumulated state.
    fn reset(&mut self);
    /// Feeds more bytes.
    fn update(&mut self, bytes: &[u8]);
    /// Returns the checksum of everything fed since the last reset.
    fn finalize(&self) -> u32;
}

/// [`Checksum`] backed by `crc32fast`.
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// CRC32 over a sequence of chunks, as written in frame headers.
pub fn frame_crc32(chunks: &[&[u8]]) -> u32 {
    let mut hasher = Crc32Fast::default();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize()
}
