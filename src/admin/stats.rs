use std::path::Path;

use serde::Serialize;

use crate::index::IndexStats;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::{directory_bytes, open_index};
use crate::admin::Result;

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub index: IndexStats,
    pub streams: Vec<StreamSection>,
    pub filesystem: FilesystemStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamSection {
    pub channel: u16,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilesystemStats {
    pub path: String,
    pub index_dir_bytes: u64,
    pub storage_dir_bytes: u64,
}

pub fn stats(path: impl AsRef<Path>, opts: &AdminOpenOptions) -> Result<StatsReport> {
    let path = path.as_ref();
    let index = open_index(path, opts)?;
    let index_stats = index.stats();
    let streams = index
        .streams()
        .iter()
        .map(|(channel, position)| StreamSection { channel, position })
        .collect();
    index.close()?;

    let filesystem = FilesystemStats {
        path: path.display().to_string(),
        index_dir_bytes: directory_bytes(&path.join("index"))?,
        storage_dir_bytes: directory_bytes(&path.join("storage"))?,
    };

    Ok(StatsReport {
        index: index_stats,
        streams,
        filesystem,
    })
}
