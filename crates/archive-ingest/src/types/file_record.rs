//! Persisted file record and the inspection output it is built from

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata computed for one extracted file
#[derive(Debug, Clone, PartialEq)]
pub struct FileInspection {
    /// Base name of the file
    pub file_name: String,
    /// Path inside the archive, `/`-separated
    pub relative_path: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Lower-case extension with leading dot, empty when absent
    pub extension: String,
    /// Detected MIME type
    pub mime_type: Option<String>,
    /// SHA-256 of the content, lower-case hex
    pub content_hash: String,
    /// Filesystem creation time, where the platform reports one
    pub created: Option<DateTime<Utc>>,
    /// Filesystem modification time
    pub modified: DateTime<Utc>,
    /// Whether the content was classified as text
    pub is_text: bool,
    /// Inline text, only for text files under the inline threshold
    pub content: Option<String>,
}

/// One document in the store, describing one file from one archive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    /// Base name of the file
    pub file_name: String,
    /// Path inside the archive
    pub file_path: String,
    /// Size in bytes
    pub file_size_bytes: u64,
    /// Lower-case extension with leading dot
    pub file_extension: String,
    /// Detected MIME type
    pub mime_type: Option<String>,
    /// SHA-256 of the content (64 hex chars), the de-duplication key
    pub file_hash: String,
    /// Filesystem creation time
    pub created_date: Option<DateTime<Utc>>,
    /// Filesystem modification time
    pub modified_date: DateTime<Utc>,
    /// When this record was built
    pub processed_date: DateTime<Utc>,
    /// Inline text content
    pub content: Option<String>,
    /// Whether the content was classified as text
    pub is_text_file: bool,
    /// Size in MiB, two decimals
    pub size_mb: f64,
    /// Owning archive file name
    pub zip_name: String,
    /// Owning archive path
    pub zip_path: String,
    /// Owning archive size in bytes
    pub zip_size_bytes: u64,
    /// Number of files in the owning archive
    pub total_files: usize,
    /// Identifier shared by every record of one run
    pub upload_batch_id: String,
    /// When the run started
    pub upload_date: DateTime<Utc>,
}

impl FileRecord {
    /// Value of the given duplicate-detection field
    pub fn key(&self, key: crate::config::DuplicateKey) -> &str {
        match key {
            crate::config::DuplicateKey::ContentHash => &self.file_hash,
            crate::config::DuplicateKey::RelativePath => &self.file_path,
        }
    }
}

/// Reason a file was not written to the store
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// Key already present in the store or claimed earlier in this run
    Duplicate { key: String },
    /// Larger than the configured per-file maximum
    TooLarge { size_bytes: u64, limit_bytes: u64 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate { key } => write!(f, "duplicate of existing key {}", key),
            Self::TooLarge {
                size_bytes,
                limit_bytes,
            } => write!(f, "{} bytes exceeds limit of {} bytes", size_bytes, limit_bytes),
        }
    }
}

/// A file that was counted but not written
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}
