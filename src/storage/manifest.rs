use serde::{Deserialize, Serialize};

use crate::types::{DomainId, SegmentId, StorageError};

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// One segment file as recorded in the manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    /// Segment identifier; the file is `segment-<id>.dat`.
    pub id: u32,
    /// Domain whose records the segment holds.
    pub domain: u32,
    /// Durable length in bytes; anything past it is discarded on open.
    pub size: u64,
}

impl SegmentEntry {
    /// Typed segment identifier.
    pub fn segment_id(&self) -> SegmentId {
        SegmentId(self.id)
    }

    /// Typed domain identifier.
    pub fn domain_id(&self) -> DomainId {
        DomainId(self.domain)
    }
}

/// Durable extent of corpus storage, committed together with index data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageManifest {
    /// Format version, see [`MANIFEST_VERSION`].
    pub version: u32,
    /// Identifier the next new segment receives.
    pub next_segment: u32,
    /// Live segments ordered by id.
    pub segments: Vec<SegmentEntry>,
}

impl Default for StorageManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            next_segment: 0,
            segments: Vec::new(),
        }
    }
}

impl StorageManifest {
    /// Serializes the manifest as stored under the manifest key.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a stored manifest and checks its internal consistency.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let manifest: StorageManifest = serde_json::from_slice(bytes)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(StorageError::Corruption("unsupported manifest version"));
        }
        let mut prev: Option<u32> = None;
        for seg in &manifest.segments {
            if prev.is_some_and(|p| p >= seg.id) {
                return Err(StorageError::Corruption("manifest segments out of order"));
            }
            if seg.id >= manifest.next_segment {
                return Err(StorageError::Corruption(
                    "manifest segment id beyond next_segment",
                ));
            }
            prev = Some(seg.id);
        }
        Ok(manifest)
    }

    /// Total durable bytes across all segments.
    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.size).sum()
    }

    /// Segments belonging to `domain`, in id order.
    pub fn domain_segments(&self, domain: DomainId) -> impl Iterator<Item = &SegmentEntry> {
        self.segments.iter().filter(move |s| s.domain == domain.0)
    }
}
