//! archive-ingest: bulk loading of ZIP archive contents into a document store
//!
//! Each archive is validated, extracted into its own scoped temporary
//! directory, and every file in it is hashed, classified and turned into a
//! [`FileRecord`]. Records whose content is already stored are skipped; the
//! rest are written with chunked insert-many calls. Failures are isolated to
//! the file or archive they occur in and reported in a [`BatchResult`].

pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod storage;
pub mod types;

pub use config::IngestConfig;
pub use error::{Error, Result};
pub use processing::{discover_archives, PipelineOrchestrator};
pub use storage::{DocumentStore, InMemoryDocumentStore};
pub use types::{ArchiveReport, BatchContext, BatchResult, FileRecord};

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashSet;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    use crate::storage::document_store::{InsertOptions, InsertOutcome};
    use crate::storage::{DocumentStore, InMemoryDocumentStore};
    use crate::types::FileRecord;

    fn write_with(path: &Path, entries: &[(&str, &[u8])], method: CompressionMethod) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default().compression_method(method);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        write_with(path, entries, CompressionMethod::Deflated);
    }

    pub fn write_stored_zip(path: &Path, entries: &[(&str, &[u8])]) {
        write_with(path, entries, CompressionMethod::Stored);
    }

    pub fn record(path: &str, hash: &str) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
            file_path: path.to_string(),
            file_size_bytes: 10,
            file_extension: ".txt".into(),
            mime_type: Some("text/plain".into()),
            file_hash: hash.to_string(),
            created_date: None,
            modified_date: now,
            processed_date: now,
            content: None,
            is_text_file: true,
            size_mb: 0.0,
            zip_name: "test.zip".into(),
            zip_path: "/tmp/test.zip".into(),
            zip_size_bytes: 100,
            total_files: 1,
            upload_batch_id: "test".into(),
            upload_date: now,
        }
    }

    /// In-memory store whose first N lookups or inserts never answer
    pub struct StallingStore {
        pub inner: InMemoryDocumentStore,
        stalled_finds: AtomicUsize,
        stalled_inserts: AtomicUsize,
    }

    impl StallingStore {
        pub fn new(stalled_finds: usize, stalled_inserts: usize) -> Self {
            Self {
                inner: InMemoryDocumentStore::new(),
                stalled_finds: AtomicUsize::new(stalled_finds),
                stalled_inserts: AtomicUsize::new(stalled_inserts),
            }
        }

        async fn maybe_stall(budget: &AtomicUsize) {
            if budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                futures::future::pending::<()>().await;
            }
        }
    }

    #[async_trait]
    impl DocumentStore for StallingStore {
        async fn ping(&self) -> crate::Result<()> {
            self.inner.ping().await
        }

        async fn find_existing(&self, field: &str, values: &[String]) -> crate::Result<HashSet<String>> {
            Self::maybe_stall(&self.stalled_finds).await;
            self.inner.find_existing(field, values).await
        }

        async fn insert_many(&self, records: &[FileRecord], options: &InsertOptions) -> crate::Result<InsertOutcome> {
            Self::maybe_stall(&self.stalled_inserts).await;
            self.inner.insert_many(records, options).await
        }

        async fn count(&self) -> crate::Result<u64> {
            self.inner.count().await
        }

        fn name(&self) -> &str {
            "stalling"
        }
    }
}
