use std::fs;
use std::path::Path;

use crate::index::PhraseIndex;

use crate::admin::error::{AdminError, Result};
use crate::admin::options::AdminOpenOptions;

/// Opens the index in `path` with admin options.
///
/// # Errors
///
/// Returns an error if the directory doesn't exist and `create_if_missing`
/// is false, or if opening the index fails.
pub fn open_index(path: &Path, opts: &AdminOpenOptions) -> Result<PhraseIndex> {
    if !path.exists() {
        if opts.create_if_missing {
            fs::create_dir_all(path)?;
        } else {
            return Err(AdminError::missing_index(path));
        }
    }
    Ok(PhraseIndex::open(path, opts.index_options())?)
}

/// Total size of the files under `path`; 0 when it does not exist.
pub(crate) fn directory_bytes(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        total += if meta.is_dir() {
            directory_bytes(&entry.path())?
        } else {
            meta.len()
        };
    }
    Ok(total)
}
