//! Archive-level metadata gathered during validation

use serde::Serialize;
use std::path::PathBuf;

/// Summary of an archive's central directory
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInfo {
    /// File name of the archive (`data.zip`)
    pub name: String,
    /// Path the archive was read from
    pub path: PathBuf,
    /// Archive size on disk in bytes
    pub size_bytes: u64,
    /// Number of file entries (directories excluded)
    pub total_files: usize,
    /// Sum of uncompressed file sizes
    pub total_uncompressed_bytes: u64,
    /// Sum of compressed file sizes
    pub total_compressed_bytes: u64,
}

impl ArchiveInfo {
    /// Space saved by compression, as a percentage with two decimals
    pub fn compression_ratio(&self) -> f64 {
        if self.total_uncompressed_bytes == 0 {
            return 0.0;
        }
        let saved = 1.0 - self.total_compressed_bytes as f64 / self.total_uncompressed_bytes as f64;
        (saved * 10_000.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(uncompressed: u64, compressed: u64) -> ArchiveInfo {
        ArchiveInfo {
            name: "a.zip".into(),
            path: PathBuf::from("a.zip"),
            size_bytes: compressed,
            total_files: 1,
            total_uncompressed_bytes: uncompressed,
            total_compressed_bytes: compressed,
        }
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(info(1000, 250).compression_ratio(), 75.0);
        assert_eq!(info(3, 2).compression_ratio(), 33.33);
        assert_eq!(info(0, 0).compression_ratio(), 0.0);
    }
}
