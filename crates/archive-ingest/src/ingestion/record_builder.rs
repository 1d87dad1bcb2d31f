//! Builds persisted records from inspection output

use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::types::{ArchiveInfo, BatchContext, FileInspection, FileRecord};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Owning-archive fields copied onto every record
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveContext {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub total_files: usize,
}

impl From<&ArchiveInfo> for ArchiveContext {
    fn from(info: &ArchiveInfo) -> Self {
        Self {
            name: info.name.clone(),
            path: info.path.clone(),
            size_bytes: info.size_bytes,
            total_files: info.total_files,
        }
    }
}

/// Pure mapping from [`FileInspection`] to [`FileRecord`]
#[derive(Debug, Clone)]
pub struct BatchRecordBuilder {
    archive: ArchiveContext,
    batch: BatchContext,
}

impl BatchRecordBuilder {
    pub fn new(archive: ArchiveContext, batch: BatchContext) -> Self {
        Self { archive, batch }
    }

    pub fn build(&self, inspection: FileInspection) -> FileRecord {
        self.build_at(inspection, Utc::now())
    }

    /// Build with an explicit processed timestamp
    pub fn build_at(&self, inspection: FileInspection, processed: DateTime<Utc>) -> FileRecord {
        FileRecord {
            size_mb: size_mb(inspection.size_bytes),
            file_name: inspection.file_name,
            file_path: inspection.relative_path,
            file_size_bytes: inspection.size_bytes,
            file_extension: inspection.extension,
            mime_type: inspection.mime_type,
            file_hash: inspection.content_hash,
            created_date: inspection.created,
            modified_date: inspection.modified,
            processed_date: processed,
            content: inspection.content,
            is_text_file: inspection.is_text,
            zip_name: self.archive.name.clone(),
            zip_path: self.archive.path.display().to_string(),
            zip_size_bytes: self.archive.size_bytes,
            total_files: self.archive.total_files,
            upload_batch_id: self.batch.batch_id.clone(),
            upload_date: self.batch.upload_date,
        }
    }
}

fn size_mb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inspection() -> FileInspection {
        FileInspection {
            file_name: "a.txt".into(),
            relative_path: "dir/a.txt".into(),
            size_bytes: 3 * 1024 * 1024 + 300_000,
            extension: ".txt".into(),
            mime_type: Some("text/plain".into()),
            content_hash: "0".repeat(64),
            created: None,
            modified: Utc::now(),
            is_text: true,
            content: None,
        }
    }

    fn builder() -> BatchRecordBuilder {
        let archive = ArchiveContext {
            name: "x.zip".into(),
            path: PathBuf::from("/in/x.zip"),
            size_bytes: 999,
            total_files: 4,
        };
        BatchRecordBuilder::new(archive, BatchContext::with_id("B1"))
    }

    #[test]
    fn test_build_copies_context() {
        let record = builder().build(inspection());
        assert_eq!(record.file_path, "dir/a.txt");
        assert_eq!(record.zip_name, "x.zip");
        assert_eq!(record.zip_path, "/in/x.zip");
        assert_eq!(record.total_files, 4);
        assert_eq!(record.upload_batch_id, "B1");
        assert_eq!(record.size_mb, 3.29);
    }

    #[test]
    fn test_build_is_deterministic() {
        let b = builder();
        let at = Utc::now();
        let input = inspection();
        assert_eq!(b.build_at(input.clone(), at), b.build_at(input, at));
    }
}
