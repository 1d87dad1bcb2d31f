//! Configuration for the ingestion pipeline
//!
//! Built once at startup (defaults, then an optional TOML file, then
//! environment overrides) and handed to the orchestrator by reference.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

const MIB: u64 = 1024 * 1024;

/// Main ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Document store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Extraction and inspection limits
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Run-level processing options
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Log destination and verbosity
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl IngestConfig {
    /// Load configuration from an optional TOML file and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&raw)?)
    }

    /// Apply overrides from environment-style variables
    ///
    /// The lookup is injected so tests never touch the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup("MONGODB_URI") {
            self.store.uri = Some(uri);
        }
        if let Some(database) = lookup("DATABASE_NAME") {
            self.store.database = database;
        }
        if let Some(collection) = lookup("COLLECTION_NAME") {
            self.store.collection = collection;
        }
        if let Some(dir) = lookup("EXTRACT_FOLDER_PATH") {
            self.extraction.temp_root = PathBuf::from(dir);
        }
        if let Some(mb) = lookup("MAX_FILE_SIZE_MB") {
            let mb: u64 = mb
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("MAX_FILE_SIZE_MB is not a number: {}", mb)))?;
            self.extraction.set_max_file_size_mb(mb)?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        if let Some(file) = lookup("LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.store.chunk_size == 0 {
            return Err(Error::Config("store.chunk_size must be at least 1".into()));
        }
        if self.store.timeout_secs == 0
            || self.store.connect_timeout_secs == 0
            || self.store.server_selection_timeout_secs == 0
        {
            return Err(Error::Config("store timeouts must be at least 1 second".into()));
        }
        if self.processing.parallel_archives == 0 {
            return Err(Error::Config(
                "processing.parallel_archives must be at least 1".into(),
            ));
        }
        if self.extraction.max_file_size_bytes == 0 {
            return Err(Error::Config(
                "extraction.max_file_size_bytes must be at least 1".into(),
            ));
        }
        if self.store.backend == StoreBackend::MongoDb
            && self.store.uri.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(Error::Config(
                "store.uri (or MONGODB_URI) is required for the mongodb backend".into(),
            ));
        }
        Ok(())
    }
}

/// Store backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// MongoDB cluster
    #[default]
    #[serde(alias = "mongo")]
    MongoDb,
    /// Process-local store, nothing persisted (dry runs and tests)
    Memory,
}

/// Field used to decide whether a record already exists in the store
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKey {
    /// SHA-256 of the file content (`file_hash`)
    #[default]
    ContentHash,
    /// Path of the file inside its archive (`file_path`)
    RelativePath,
}

impl DuplicateKey {
    /// Name of the document field holding the key
    pub fn field(&self) -> &'static str {
        match self {
            Self::ContentHash => "file_hash",
            Self::RelativePath => "file_path",
        }
    }
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend provider (default: mongodb)
    #[serde(default)]
    pub backend: StoreBackend,
    /// Connection string, including credentials
    #[serde(default)]
    pub uri: Option<String>,
    /// Target database (default: zip_uploads)
    #[serde(default = "default_database")]
    pub database: String,
    /// Target collection (default: files)
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Maximum documents per insert-many call (default: 1000)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Deadline for every store call in seconds (default: 30)
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
    /// TCP connect timeout in seconds (default: 10)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Server selection timeout in seconds (default: 5)
    #[serde(default = "default_server_selection_timeout")]
    pub server_selection_timeout_secs: u64,
    /// Key used for duplicate detection
    #[serde(default)]
    pub duplicate_key: DuplicateKey,
    /// Skip records whose key already exists (default: true)
    #[serde(default = "default_true")]
    pub skip_duplicates: bool,
    /// Stop a chunk at the first rejected document (default: false)
    #[serde(default)]
    pub ordered_inserts: bool,
    /// Ask the store to skip schema validation (default: false)
    #[serde(default)]
    pub bypass_document_validation: bool,
}

fn default_database() -> String { "zip_uploads".to_string() }
fn default_collection() -> String { "files".to_string() }
fn default_chunk_size() -> usize { 1000 }
fn default_store_timeout() -> u64 { 30 }
fn default_connect_timeout() -> u64 { 10 }
fn default_server_selection_timeout() -> u64 { 5 }
fn default_true() -> bool { true }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            uri: None,
            database: default_database(),
            collection: default_collection(),
            chunk_size: default_chunk_size(),
            timeout_secs: default_store_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            server_selection_timeout_secs: default_server_selection_timeout(),
            duplicate_key: DuplicateKey::default(),
            skip_duplicates: true,
            ordered_inserts: false,
            bypass_document_validation: false,
        }
    }
}

impl StoreConfig {
    /// Deadline applied to each store call
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Extraction and inspection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Root under which per-archive temporary directories are created
    #[serde(default = "default_temp_root")]
    pub temp_root: PathBuf,
    /// Files larger than this are skipped and never read (default: 50MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Ceiling on an archive's total uncompressed size (default: 4GB)
    #[serde(default = "default_max_archive_uncompressed")]
    pub max_archive_uncompressed_bytes: Option<u64>,
    /// Text files up to this size are stored inline (default: 1MB)
    #[serde(default = "default_inline_text_max")]
    pub inline_text_max_bytes: u64,
    /// Decompress every entry during validation to catch CRC errors (default: true)
    #[serde(default = "default_true")]
    pub verify_checksums: bool,
    /// Bytes sampled when deciding whether content is text (default: 8KB)
    #[serde(default = "default_text_probe")]
    pub text_probe_bytes: usize,
}

fn default_temp_root() -> PathBuf { std::env::temp_dir().join("archive-ingest") }
fn default_max_file_size() -> u64 { 50 * MIB }
fn default_max_archive_uncompressed() -> Option<u64> { Some(4 * 1024 * MIB) }
fn default_inline_text_max() -> u64 { MIB }
fn default_text_probe() -> usize { 8 * 1024 }

impl ExtractionConfig {
    /// Set the per-file limit from a size in MiB
    pub fn set_max_file_size_mb(&mut self, mb: u64) -> Result<()> {
        self.max_file_size_bytes = mb
            .checked_mul(MIB)
            .ok_or_else(|| Error::Config(format!("max file size of {} MB is too large", mb)))?;
        Ok(())
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            temp_root: default_temp_root(),
            max_file_size_bytes: default_max_file_size(),
            max_archive_uncompressed_bytes: default_max_archive_uncompressed(),
            inline_text_max_bytes: default_inline_text_max(),
            verify_checksums: true,
            text_probe_bytes: default_text_probe(),
        }
    }
}

/// Run-level processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Archives processed at once (default: 1, sequential)
    #[serde(default = "default_parallel_archives")]
    pub parallel_archives: usize,
    /// Search source directories recursively (default: false)
    #[serde(default)]
    pub recursive: bool,
}

fn default_parallel_archives() -> usize { 1 }

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_archives: default_parallel_archives(),
            recursive: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset (default: info)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file, written in addition to stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            json: false,
        }
    }
}
