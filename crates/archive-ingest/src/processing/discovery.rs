//! Finding archives under a source path

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Archives to ingest from `source`
///
/// A file is returned as-is whatever its extension; the validator decides
/// whether it is an archive. A directory yields its `.zip` files (any case),
/// descending into subdirectories only when `recursive` is set. Results are
/// sorted so runs are reproducible.
pub fn discover_archives(source: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let metadata = std::fs::metadata(source).map_err(|_| Error::SourceNotFound(source.to_path_buf()))?;

    if metadata.is_file() {
        return Ok(vec![source.to_path_buf()]);
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut archives = Vec::new();
    for entry in WalkDir::new(source).max_depth(max_depth).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable path during discovery: {}", e);
                continue;
            }
        };
        if entry.file_type().is_file() && is_zip_name(entry.path()) {
            archives.push(entry.into_path());
        }
    }

    archives.sort();
    tracing::info!(
        "Found {} archive(s) in {}{}",
        archives.len(),
        source.display(),
        if recursive { " (recursive)" } else { "" }
    );
    Ok(archives)
}

fn is_zip_name(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}
