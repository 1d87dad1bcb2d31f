//! Pre-extraction archive checks
//!
//! Runs before anything is written to disk so that a missing, corrupt or
//! oversized archive never costs extraction space.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::config::ExtractionConfig;
use crate::error::{Error, Result, ValidationReason};
use crate::types::ArchiveInfo;

/// Local file header, empty archive and spanned archive signatures
const ZIP_SIGNATURES: [[u8; 4]; 3] = [
    [0x50, 0x4b, 0x03, 0x04],
    [0x50, 0x4b, 0x05, 0x06],
    [0x50, 0x4b, 0x07, 0x08],
];

/// Verifies archives are well-formed and within size limits
#[derive(Debug, Clone)]
pub struct ArchiveValidator {
    max_uncompressed_bytes: Option<u64>,
    verify_checksums: bool,
}

impl ArchiveValidator {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            max_uncompressed_bytes: config.max_archive_uncompressed_bytes,
            verify_checksums: config.verify_checksums,
        }
    }

    /// Validate an archive and summarize its central directory
    pub fn validate(&self, path: &Path) -> Result<ArchiveInfo> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let metadata = match std::fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                return Err(Error::validation(name, ValidationReason::NotFound, "not a regular file"))
            }
            Err(e) => return Err(Error::validation(name, ValidationReason::NotFound, e.to_string())),
        };

        let corrupt = |message: String| Error::validation(name.clone(), ValidationReason::Corrupt, message);

        let mut file = File::open(path).map_err(|e| corrupt(e.to_string()))?;
        let mut signature = [0u8; 4];
        if file.read_exact(&mut signature).is_err() || !ZIP_SIGNATURES.contains(&signature) {
            return Err(corrupt("missing ZIP signature".to_string()));
        }

        let file = File::open(path).map_err(|e| corrupt(e.to_string()))?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;

        let mut total_files = 0usize;
        let mut total_uncompressed = 0u64;
        let mut total_compressed = 0u64;
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i).map_err(|e| corrupt(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            total_files += 1;
            total_uncompressed = total_uncompressed.saturating_add(entry.size());
            total_compressed = total_compressed.saturating_add(entry.compressed_size());
        }

        if let Some(limit) = self.max_uncompressed_bytes {
            if total_uncompressed > limit {
                return Err(Error::validation(
                    name.clone(),
                    ValidationReason::TooLarge,
                    format!("{} bytes uncompressed exceeds limit of {} bytes", total_uncompressed, limit),
                ));
            }
        }

        if self.verify_checksums {
            for i in 0..archive.len() {
                let mut entry = archive.by_index(i).map_err(|e| corrupt(e.to_string()))?;
                if entry.is_dir() {
                    continue;
                }
                let entry_name = entry.name().to_string();
                io::copy(&mut entry, &mut io::sink())
                    .map_err(|e| corrupt(format!("{}: {}", entry_name, e)))?;
            }
        }

        let info = ArchiveInfo {
            name,
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            total_files,
            total_uncompressed_bytes: total_uncompressed,
            total_compressed_bytes: total_compressed,
        };

        tracing::info!(
            archive = %info.name,
            files = info.total_files,
            uncompressed = info.total_uncompressed_bytes,
            compression_ratio = info.compression_ratio(),
            "archive validated"
        );

        Ok(info)
    }
}
