use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use phrase_index::admin::AdminOpenOptions;
use phrase_index::index::CountFloor;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid count_floor '{0}' (expected 'present' or 'always')")]
    CountFloor(String),
}

/// Settings read from the optional TOML config file.
///
/// ```toml
/// [index]
/// prefix_length = 4
/// gc_batch_size = 1000
/// sync_writes = true
/// count_floor = "present"
/// ```
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub index: IndexSection,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IndexSection {
    pub prefix_length: Option<u8>,
    pub gc_batch_size: Option<usize>,
    pub sync_writes: Option<bool>,
    pub count_floor: Option<String>,
}

impl CliConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies file settings on top of the admin defaults.
    pub fn apply(&self, opts: &mut AdminOpenOptions) -> Result<(), ConfigError> {
        if let Some(prefix_length) = self.index.prefix_length {
            opts.prefix_length = prefix_length;
        }
        if let Some(batch) = self.index.gc_batch_size {
            opts.gc_batch_size = batch;
        }
        if let Some(sync) = self.index.sync_writes {
            opts.sync_writes = sync;
        }
        if let Some(floor) = self.index.count_floor.as_deref() {
            opts.count_floor = parse_count_floor(floor)?;
        }
        Ok(())
    }
}

fn parse_count_floor(raw: &str) -> Result<CountFloor, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "present" => Ok(CountFloor::Present),
        "always" => Ok(CountFloor::Always),
        other => Err(ConfigError::CountFloor(other.to_string())),
    }
}
