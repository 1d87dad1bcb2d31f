//! Error types for the ingestion pipeline

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why an archive was rejected before extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationReason {
    /// Path does not exist or is not a regular file
    NotFound,
    /// Not a ZIP container, or the container fails its integrity checks
    Corrupt,
    /// Total uncompressed size exceeds the configured ceiling
    TooLarge,
}

impl ValidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::Corrupt => "corrupt",
            Self::TooLarge => "too-large",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ingestion errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source path given on the command line does not exist
    #[error("Source path not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Temporary extraction root cannot be created or written
    #[error("Extraction root {} unusable: {message}", .path.display())]
    ExtractionRoot { path: PathBuf, message: String },

    /// Archive rejected before extraction
    #[error("Invalid archive '{archive}' ({reason}): {message}")]
    Validation {
        archive: String,
        reason: ValidationReason,
        message: String,
    },

    /// Entry-level extraction failure
    #[error("Failed to extract entry '{entry}': {message}")]
    Extraction { entry: String, message: String },

    /// Entry would resolve outside the extraction area
    #[error("Entry '{entry}' escapes the extraction directory")]
    PathTraversal { entry: String },

    /// File could not be read or hashed
    #[error("Failed to inspect '{}': {message}", .path.display())]
    Inspection { path: PathBuf, message: String },

    /// Store unreachable or connection dropped
    #[error("Store connection error: {0}")]
    StoreConnection(String),

    /// Chunk-level write failure; `rejected` documents were not persisted
    #[error("Store write error ({rejected} documents rejected): {message}")]
    StoreWrite { message: String, rejected: usize },

    /// Store call exceeded its deadline
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// Run was cancelled before this unit of work started
    #[error("Cancelled")]
    Cancelled,

    /// ZIP container error
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(
        archive: impl Into<String>,
        reason: ValidationReason,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            archive: archive.into(),
            reason,
            message: message.into(),
        }
    }

    /// Create an extraction error
    pub fn extraction(entry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            entry: entry.into(),
            message: message.into(),
        }
    }

    /// Create an inspection error
    pub fn inspection(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Inspection {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a store connection error
    pub fn store_connection(message: impl Into<String>) -> Self {
        Self::StoreConnection(message.into())
    }

    /// Create a store write error
    pub fn store_write(message: impl Into<String>, rejected: usize) -> Self {
        Self::StoreWrite {
            message: message.into(),
            rejected,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Errors that abort the whole run rather than a single archive or file
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::SourceNotFound(_) | Self::ExtractionRoot { .. }
        )
    }

    /// Validation reason, if this is a validation error
    pub fn validation_reason(&self) -> Option<ValidationReason> {
        match self {
            Self::Validation { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
