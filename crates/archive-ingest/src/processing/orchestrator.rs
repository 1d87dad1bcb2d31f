//! Drives archives through validate, extract, inspect, filter and write

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::discovery::discover_archives;
use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::ingestion::{
    ArchiveContext, ArchiveExtractor, ArchiveValidator, BatchRecordBuilder, ExtractionArea,
    FileInspector,
};
use crate::storage::{DocumentStore, DuplicateFilter, StoreWriter};
use crate::types::{
    ArchiveReport, ArchiveStage, BatchContext, BatchCounters, BatchResult, FileRecord, SkipReason,
};

/// Called once per archive when it reaches a terminal state
pub type ProgressCallback = Arc<dyn Fn(&ArchiveReport) + Send + Sync>;

/// Runs a batch of archives against one document store
///
/// Each archive is isolated: its failure is recorded in the
/// [`BatchResult`] and the run moves on. Only an unusable extraction root
/// ends the run early.
pub struct PipelineOrchestrator {
    config: Arc<IngestConfig>,
    store: Arc<dyn DocumentStore>,
    validator: ArchiveValidator,
    extractor: ArchiveExtractor,
    inspector: FileInspector,
    writer: StoreWriter,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl PipelineOrchestrator {
    pub fn new(config: Arc<IngestConfig>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            validator: ArchiveValidator::new(&config.extraction),
            extractor: ArchiveExtractor::new(config.extraction.max_file_size_bytes),
            inspector: FileInspector::new(&config.extraction),
            writer: StoreWriter::new(&config.store),
            cancel: CancellationToken::new(),
            progress: None,
            config,
            store,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Token that stops new archives from starting when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ping the store and return its current document count
    pub async fn preflight(&self) -> Result<u64> {
        let limit = self.config.store.timeout();
        let secs = limit.as_secs();

        timeout(limit, self.store.ping())
            .await
            .map_err(|_| Error::store_connection(format!("ping timed out after {}s", secs)))??;
        let count = timeout(limit, self.store.count())
            .await
            .map_err(|_| Error::timeout("count", secs))??;

        tracing::info!(
            "Connected to {} store, collection holds {} document(s)",
            self.store.name(),
            count
        );
        Ok(count)
    }

    /// Discover archives under `source` and run them as one batch
    pub async fn run_source(&self, source: &Path, recursive: bool, batch: &BatchContext) -> Result<BatchResult> {
        let archives = discover_archives(source, recursive)?;
        self.run(archives, batch).await
    }

    /// Process `archives` as one batch sharing `batch`'s id
    pub async fn run(&self, archives: Vec<PathBuf>, batch: &BatchContext) -> Result<BatchResult> {
        let temp_root = &self.config.extraction.temp_root;
        std::fs::create_dir_all(temp_root).map_err(|e| Error::ExtractionRoot {
            path: temp_root.clone(),
            message: e.to_string(),
        })?;

        tracing::info!(
            "Starting batch {} with {} archive(s), {} at a time",
            batch.batch_id,
            archives.len(),
            self.config.processing.parallel_archives
        );

        let counters = BatchCounters::new(batch);
        let duplicates = DuplicateFilter::new(&self.config.store);
        let semaphore = Semaphore::new(self.config.processing.parallel_archives.max(1));

        let archive_futures: Vec<_> = archives
            .into_iter()
            .map(|path| {
                let counters = &counters;
                let duplicates = &duplicates;
                let semaphore = &semaphore;

                async move {
                    let permit = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => None,
                        permit = semaphore.acquire() => permit.ok(),
                    };

                    let report = match permit {
                        Some(_permit) if !self.cancel.is_cancelled() => {
                            self.process_archive(path, batch, duplicates).await
                        }
                        _ => {
                            let mut report = ArchiveReport::new(path);
                            report.cancel();
                            tracing::info!("[{}] Not started, run cancelled", report.archive);
                            report
                        }
                    };

                    if let Some(progress) = &self.progress {
                        progress(&report);
                    }
                    counters.record(report);
                }
            })
            .collect();

        join_all(archive_futures).await;

        let result = counters.finish();
        tracing::info!(
            "Batch {} finished in {:.1}s: {} archive(s) done, {} failed, {} cancelled; \
             {} file(s) inserted, {} skipped, {} failed, {} bytes written",
            result.batch_id,
            result.duration_secs,
            result.totals.archives_processed,
            result.totals.archives_failed,
            result.totals.archives_cancelled,
            result.totals.files_processed,
            result.totals.files_skipped,
            result.totals.files_failed,
            result.totals.bytes_written
        );
        Ok(result)
    }

    async fn process_archive(
        &self,
        path: PathBuf,
        batch: &BatchContext,
        duplicates: &DuplicateFilter,
    ) -> ArchiveReport {
        let name = ArchiveReport::new(path.clone()).archive;
        let span = tracing::info_span!("archive", archive = %name);

        async move {
            let start = std::time::Instant::now();
            tracing::info!("[{}] Starting", name);

            let job = PrepareJob {
                path: path.clone(),
                temp_root: self.config.extraction.temp_root.clone(),
                validator: self.validator.clone(),
                extractor: self.extractor.clone(),
                inspector: self.inspector.clone(),
                batch: batch.clone(),
            };

            let (mut report, records) = match tokio::task::spawn_blocking(move || job.run()).await {
                Ok(prepared) => prepared,
                Err(e) => {
                    let mut report = ArchiveReport::new(path);
                    report.fail(&Error::internal(format!("archive worker failed: {}", e)));
                    return report;
                }
            };

            let Some(records) = records else {
                tracing::error!(
                    "[{}] Failed at {}: {}",
                    name,
                    report.failed_at.map(|s| s.as_str()).unwrap_or("unknown"),
                    report.error.as_deref().unwrap_or_default()
                );
                return report;
            };

            self.persist(&mut report, records, duplicates).await;

            let elapsed = start.elapsed();
            if report.is_done() {
                tracing::info!(
                    "[{}] Done in {:.1}s: {} inserted, {} skipped, {} failed",
                    name,
                    elapsed.as_secs_f64(),
                    report.files_inserted,
                    report.files_skipped,
                    report.files_failed
                );
            } else {
                tracing::error!(
                    "[{}] Failed at {} after {:.1}s: {}",
                    name,
                    report.failed_at.map(|s| s.as_str()).unwrap_or("unknown"),
                    elapsed.as_secs_f64(),
                    report.error.as_deref().unwrap_or_default()
                );
            }
            report
        }
        .instrument(span)
        .await
    }

    /// Filter and write one archive's records
    async fn persist(&self, report: &mut ArchiveReport, records: Vec<FileRecord>, duplicates: &DuplicateFilter) {
        report.advance(ArchiveStage::Filtering);
        let filtered = match duplicates.filter(&self.store, records).await {
            Ok(filtered) => filtered,
            Err(e) => {
                report.fail(&e);
                return;
            }
        };
        report.files_skipped += filtered.skipped.len() as u64;
        for skipped in &filtered.skipped {
            tracing::debug!("[{}] Skipped {}: {}", report.archive, skipped.path, skipped.reason);
        }

        report.advance(ArchiveStage::Writing);
        let accepted = filtered.accepted;
        let written = self.writer.write(&self.store, &accepted).await;

        report.files_inserted += written.inserted as u64;
        report.bytes_written += written.bytes_written;
        for failure in &written.failed {
            if let Some(record) = accepted.get(failure.index) {
                report.file_failed(record.file_path.clone(), failure.message.clone());
            }
        }
        duplicates.release(
            written
                .failed
                .iter()
                .filter_map(|f| accepted.get(f.index))
                .map(|r| r.key(duplicates.key())),
        );

        match written.aborted {
            Some(e) => report.fail(&e),
            None => report.advance(ArchiveStage::Done),
        }
    }
}

/// Disk-bound half of an archive: validate, extract, inspect, build
struct PrepareJob {
    path: PathBuf,
    temp_root: PathBuf,
    validator: ArchiveValidator,
    extractor: ArchiveExtractor,
    inspector: FileInspector,
    batch: BatchContext,
}

impl PrepareJob {
    /// Returns the records to persist, or `None` when the archive failed
    fn run(self) -> (ArchiveReport, Option<Vec<FileRecord>>) {
        let mut report = ArchiveReport::new(self.path.clone());

        let info = match self.validator.validate(&self.path) {
            Ok(info) => info,
            Err(e) => {
                report.fail(&e);
                return (report, None);
            }
        };
        report.advance(ArchiveStage::Validated);

        let area = match ExtractionArea::create(&self.temp_root, &info.name) {
            Ok(area) => area,
            Err(e) => {
                report.fail(&e);
                return (report, None);
            }
        };

        report.advance(ArchiveStage::Extracting);
        let extraction = match self.extractor.extract(&self.path, &area) {
            Ok(extraction) => extraction,
            Err(e) => {
                report.fail(&e);
                release(area, &report.archive);
                return (report, None);
            }
        };

        report.files_extracted = extraction.files.len() as u64;
        for failure in extraction.failed {
            tracing::warn!("[{}] Failed to extract {}: {}", report.archive, failure.entry, failure.error);
            report.file_failed(failure.entry, failure.error.to_string());
        }
        let limit_bytes = self.extractor.max_file_size_bytes();
        for oversized in extraction.oversized {
            let reason = SkipReason::TooLarge {
                size_bytes: oversized.size_bytes,
                limit_bytes,
            };
            tracing::info!("[{}] Skipped {}: {}", report.archive, oversized.entry, reason);
            report.files_skipped += 1;
        }

        report.advance(ArchiveStage::Inspecting);
        let builder = BatchRecordBuilder::new(ArchiveContext::from(&info), self.batch);
        let mut records = Vec::with_capacity(extraction.files.len());
        for file in &extraction.files {
            match self.inspector.inspect(file) {
                Ok(inspection) => records.push(builder.build(inspection)),
                Err(e) => {
                    tracing::warn!("[{}] Failed to inspect {}: {}", report.archive, file.relative_path, e);
                    report.file_failed(file.relative_path.clone(), e.to_string());
                }
            }
        }

        release(area, &report.archive);
        (report, Some(records))
    }
}

fn release(area: ExtractionArea, archive: &str) {
    let path = area.path().to_path_buf();
    if let Err(e) = area.release() {
        tracing::warn!("[{}] Failed to remove {}: {}", archive, path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;
    use crate::storage::InMemoryDocumentStore;
    use crate::test_support::{write_zip, StallingStore};

    fn config(temp_root: &Path) -> IngestConfig {
        let mut config = IngestConfig::default();
        config.store.backend = StoreBackend::Memory;
        config.extraction.temp_root = temp_root.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_corrupt_archive_fails_at_discovered() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.zip");
        std::fs::write(&bad, b"nope").unwrap();

        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let orchestrator = PipelineOrchestrator::new(Arc::new(config(&dir.path().join("tmp"))), store);
        let result = orchestrator
            .run(vec![bad], &BatchContext::with_id("T"))
            .await
            .unwrap();

        let report = result.archive("bad.zip").unwrap();
        assert!(report.is_failed());
        assert_eq!(report.failed_at, Some(ArchiveStage::Discovered));
        assert!(report.error.as_deref().unwrap().contains("corrupt"));
        assert_eq!(result.totals.archives_failed, 1);
    }

    #[tokio::test]
    async fn test_all_duplicates_still_done() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("dup.zip");
        write_zip(&zip, &[("a.txt", b"same"), ("b.txt", b"same")]);

        let memory = Arc::new(InMemoryDocumentStore::new());
        let store: Arc<dyn DocumentStore> = memory.clone();
        let orchestrator = PipelineOrchestrator::new(Arc::new(config(&dir.path().join("tmp"))), store);
        let result = orchestrator.run(vec![zip], &BatchContext::with_id("T")).await.unwrap();

        assert_eq!(result.totals.archives_processed, 1);
        assert_eq!(result.totals.files_processed, 1);
        assert_eq!(result.totals.files_skipped, 1);
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn test_store_loss_fails_archive_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("1.zip");
        let second = dir.path().join("2.zip");
        write_zip(&first, &[("a.txt", b"a")]);
        write_zip(&second, &[("b.txt", b"b")]);

        let memory = Arc::new(InMemoryDocumentStore::new());
        memory.set_reachable(false);
        let store: Arc<dyn DocumentStore> = memory.clone();
        let orchestrator = PipelineOrchestrator::new(Arc::new(config(&dir.path().join("tmp"))), store);
        let result = orchestrator
            .run(vec![first, second], &BatchContext::with_id("T"))
            .await
            .unwrap();

        assert_eq!(result.totals.archives_failed, 2);
        assert_eq!(result.archives[0].failed_at, Some(ArchiveStage::Filtering));
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let zip = dir.path().join("x.zip");
        write_zip(&zip, &[("a.txt", b"a")]);

        let memory = Arc::new(InMemoryDocumentStore::new());
        let store: Arc<dyn DocumentStore> = memory.clone();
        let orchestrator = PipelineOrchestrator::new(Arc::new(config(&dir.path().join("tmp"))), store);
        orchestrator.cancellation_token().cancel();

        let result = orchestrator.run(vec![zip], &BatchContext::with_id("T")).await.unwrap();
        assert_eq!(result.totals.archives_cancelled, 1);
        assert!(result.archives[0].cancelled);
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_unusable_temp_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let orchestrator = PipelineOrchestrator::new(Arc::new(config(&blocker.join("tmp"))), store);
        let err = orchestrator
            .run(vec![dir.path().join("x.zip")], &BatchContext::with_id("T"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExtractionRoot { .. }));
        assert!(err.is_run_fatal());
    }

    #[tokio::test]
    async fn test_preflight_reports_count() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(InMemoryDocumentStore::new());
        let store: Arc<dyn DocumentStore> = memory.clone();
        let orchestrator = PipelineOrchestrator::new(Arc::new(config(dir.path())), store);
        assert_eq!(orchestrator.preflight().await.unwrap(), 0);

        memory.set_reachable(false);
        assert!(matches!(orchestrator.preflight().await, Err(Error::StoreConnection(_))));
    }

    #[tokio::test]
    async fn test_cancel_mid_run_finishes_in_flight_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archives: Vec<PathBuf> = (1..=3)
            .map(|i| {
                let path = dir.path().join(format!("{}.zip", i));
                write_zip(&path, &[("f.txt", format!("archive {}", i).as_bytes())]);
                path
            })
            .collect();

        let temp_root = dir.path().join("tmp");
        let memory = Arc::new(InMemoryDocumentStore::new());
        let store: Arc<dyn DocumentStore> = memory.clone();
        let orchestrator = PipelineOrchestrator::new(Arc::new(config(&temp_root)), store);
        let token = orchestrator.cancellation_token();
        let orchestrator = orchestrator.with_progress(Arc::new(move |_: &ArchiveReport| token.cancel()));

        let result = orchestrator.run(archives, &BatchContext::with_id("T")).await.unwrap();

        assert_eq!(result.totals.archives_processed, 1);
        assert_eq!(result.totals.archives_cancelled, 2);
        assert!(result.archive("1.zip").unwrap().is_done());
        assert_eq!(memory.len(), 1);
        assert_eq!(std::fs::read_dir(&temp_root).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_fails_archive_and_next_runs() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("1.zip");
        let second = dir.path().join("2.zip");
        write_zip(&first, &[("a.txt", b"a")]);
        write_zip(&second, &[("b.txt", b"b")]);

        let mut config = config(&dir.path().join("tmp"));
        config.store.timeout_secs = 1;
        let stalling = Arc::new(StallingStore::new(1, 0));
        let store: Arc<dyn DocumentStore> = stalling.clone();
        let orchestrator = PipelineOrchestrator::new(Arc::new(config), store);

        let result = orchestrator
            .run(vec![first, second], &BatchContext::with_id("T"))
            .await
            .unwrap();

        let stalled = result.archive("1.zip").unwrap();
        assert!(stalled.is_failed());
        assert_eq!(stalled.failed_at, Some(ArchiveStage::Filtering));
        assert!(stalled.error.as_deref().unwrap().contains("timed out"));
        assert!(result.archive("2.zip").unwrap().is_done());
        assert_eq!(stalling.inner.len(), 1);
    }
}
