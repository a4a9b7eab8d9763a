//! File utility functions for listing and filtering files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Raster formats the remote solver accepts and the renderer can decode.
pub const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Returns paths to all files in a directory matching the given extensions,
/// sorted by file name. Extensions are matched case-insensitively.
pub fn files_with_extensions(dir: &Path, extensions: &[&str]) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|path| path.is_file() && has_extension(path, extensions))
        .collect();
    files.sort();
    Ok(files)
}

/// Returns the first file (in name order) whose name contains `needle`,
/// ignoring case and surrounding whitespace, among files with the given extensions.
pub fn find_file_containing(
    dir: &Path,
    needle: &str,
    extensions: &[&str],
) -> io::Result<Option<PathBuf>> {
    let needle = needle.trim().to_lowercase();
    let found = files_with_extensions(dir, extensions)?
        .into_iter()
        .find(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().trim().to_lowercase().contains(&needle))
                .unwrap_or(false)
        });
    Ok(found)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    // Trailing whitespace after the extension shows up in files copied from some phones.
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .trim()
        .to_lowercase();
    extensions.contains(&ext.as_str())
}
