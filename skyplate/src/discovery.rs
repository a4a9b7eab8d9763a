//! Locating the photo to solve.

use std::path::{Path, PathBuf};

use common::file_utils::{PHOTO_EXTENSIONS, find_file_containing};

use crate::error::{Error, Result};

/// First photo in `dir` (name order) whose file name contains `pattern`,
/// case-insensitively. Only JPEG and PNG files are considered.
pub fn find_photo(dir: &Path, pattern: &str) -> Result<PathBuf> {
    let found = find_file_containing(dir, pattern, PHOTO_EXTENSIONS).map_err(|e| Error::io(dir, e))?;
    match found {
        Some(path) => {
            tracing::info!("Found photo {}", path.display());
            Ok(path)
        }
        None => Err(Error::Discovery {
            dir: dir.to_path_buf(),
            pattern: pattern.trim().to_string(),
        }),
    }
}
