use std::path::{Path, PathBuf};

use crate::types::PhraseError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Index directory not found at the specified path.
    #[error("index not found: {0}")]
    MissingIndex(PathBuf),
    /// Custom error message.
    #[error("{0}")]
    Message(String),
    /// Core index error.
    #[error(transparent)]
    Core(#[from] PhraseError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_index(path: impl AsRef<Path>) -> Self {
        AdminError::MissingIndex(path.as_ref().to_path_buf())
    }
}
