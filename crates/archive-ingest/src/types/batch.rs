//! Run-level bookkeeping: batch identity, per-archive reports and counters

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Identity shared by every record produced in one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchContext {
    /// Batch id stamped on every record
    pub batch_id: String,
    /// Upload timestamp stamped on every record
    pub upload_date: DateTime<Utc>,
}

impl BatchContext {
    /// New context with a generated id (`batch_20250101_120000_1a2b3c4d`)
    pub fn new() -> Self {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            batch_id: format!("batch_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8]),
            upload_date: now,
        }
    }

    /// New context with a caller-supplied id
    pub fn with_id(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            upload_date: Utc::now(),
        }
    }
}

impl Default for BatchContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of one archive within a run
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStage {
    Discovered,
    Validated,
    Extracting,
    Inspecting,
    Filtering,
    Writing,
    Done,
    Failed,
}

impl ArchiveStage {
    /// Whether `next` is a legal successor of this stage
    pub fn can_advance_to(self, next: ArchiveStage) -> bool {
        use ArchiveStage::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Discovered, Validated)
            | (Validated, Extracting)
            | (Extracting, Inspecting)
            | (Inspecting, Filtering)
            | (Filtering, Writing)
            | (Writing, Done) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Validated => "validated",
            Self::Extracting => "extracting",
            Self::Inspecting => "inspecting",
            Self::Filtering => "filtering",
            Self::Writing => "writing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ArchiveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file-level problem kept for the run summary
#[derive(Debug, Clone, Serialize)]
pub struct FileIssue {
    /// Path inside the archive
    pub path: String,
    /// Human-readable reason
    pub reason: String,
}

/// Outcome of one archive
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    /// Archive file name
    pub archive: String,
    /// Archive path
    pub path: PathBuf,
    /// Final stage (`done` or `failed`), `discovered` when never started
    pub stage: ArchiveStage,
    /// Stage in which the archive failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<ArchiveStage>,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the archive was never started because the run was cancelled
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    /// Files written out of the archive
    pub files_extracted: u64,
    /// Records inserted into the store
    pub files_inserted: u64,
    /// Files skipped as duplicates or oversized
    pub files_skipped: u64,
    /// Files that failed extraction, inspection or insertion
    pub files_failed: u64,
    /// Sum of `file_size_bytes` over inserted records
    pub bytes_written: u64,
    /// Per-file failures, for the summary
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_errors: Vec<FileIssue>,
}

impl ArchiveReport {
    pub fn new(path: PathBuf) -> Self {
        let archive = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            archive,
            path,
            stage: ArchiveStage::Discovered,
            failed_at: None,
            error: None,
            cancelled: false,
            files_extracted: 0,
            files_inserted: 0,
            files_skipped: 0,
            files_failed: 0,
            bytes_written: 0,
            file_errors: Vec::new(),
        }
    }

    /// Move to the next lifecycle stage
    pub fn advance(&mut self, next: ArchiveStage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal archive transition {} -> {}",
            self.stage,
            next
        );
        tracing::debug!(archive = %self.archive, from = %self.stage, to = %next, "archive stage");
        self.stage = next;
    }

    /// Terminate the archive in `failed`, remembering where it stopped
    pub fn fail(&mut self, error: &crate::error::Error) {
        if self.stage.is_terminal() {
            return;
        }
        self.failed_at = Some(self.stage);
        self.error = Some(error.to_string());
        self.stage = ArchiveStage::Failed;
    }

    /// Mark an archive that was never started
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.error = Some(crate::error::Error::Cancelled.to_string());
    }

    /// Record a file-level failure
    pub fn file_failed(&mut self, path: impl Into<String>, reason: impl Into<String>) {
        self.files_failed += 1;
        self.file_errors.push(FileIssue {
            path: path.into(),
            reason: reason.into(),
        });
    }

    pub fn is_done(&self) -> bool {
        self.stage == ArchiveStage::Done
    }

    pub fn is_failed(&self) -> bool {
        self.stage == ArchiveStage::Failed
    }
}

/// Counters shared by every archive of a run
///
/// Updated concurrently by archive workers; frozen into a [`BatchResult`]
/// by [`BatchCounters::finish`].
#[derive(Debug)]
pub struct BatchCounters {
    batch_id: String,
    started_at: DateTime<Utc>,
    archives_processed: AtomicU64,
    archives_failed: AtomicU64,
    archives_cancelled: AtomicU64,
    files_processed: AtomicU64,
    files_skipped: AtomicU64,
    files_failed: AtomicU64,
    bytes_written: AtomicU64,
    reports: Mutex<Vec<ArchiveReport>>,
}

impl BatchCounters {
    pub fn new(batch: &BatchContext) -> Self {
        Self {
            batch_id: batch.batch_id.clone(),
            started_at: Utc::now(),
            archives_processed: AtomicU64::new(0),
            archives_failed: AtomicU64::new(0),
            archives_cancelled: AtomicU64::new(0),
            files_processed: AtomicU64::new(0),
            files_skipped: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            reports: Mutex::new(Vec::new()),
        }
    }

    /// Fold a finished archive into the run totals
    pub fn record(&self, report: ArchiveReport) {
        if report.cancelled {
            self.archives_cancelled.fetch_add(1, Ordering::Relaxed);
        } else if report.is_done() {
            self.archives_processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.archives_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.files_processed
            .fetch_add(report.files_inserted, Ordering::Relaxed);
        self.files_skipped
            .fetch_add(report.files_skipped, Ordering::Relaxed);
        self.files_failed
            .fetch_add(report.files_failed, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(report.bytes_written, Ordering::Relaxed);
        self.reports.lock().push(report);
    }

    /// Current totals without ending the run
    pub fn snapshot(&self) -> BatchTotals {
        BatchTotals {
            archives_processed: self.archives_processed.load(Ordering::Relaxed),
            archives_failed: self.archives_failed.load(Ordering::Relaxed),
            archives_cancelled: self.archives_cancelled.load(Ordering::Relaxed),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    /// End the run
    pub fn finish(self) -> BatchResult {
        let totals = self.snapshot();
        let finished_at = Utc::now();
        let duration_secs = (finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        let mut archives = self.reports.into_inner();
        archives.sort_by(|a, b| a.path.cmp(&b.path));

        BatchResult {
            batch_id: self.batch_id,
            started_at: self.started_at,
            finished_at,
            duration_secs,
            totals,
            archives,
        }
    }
}

/// Run totals
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct BatchTotals {
    pub archives_processed: u64,
    pub archives_failed: u64,
    pub archives_cancelled: u64,
    pub files_processed: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub bytes_written: u64,
}

/// Immutable outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    #[serde(flatten)]
    pub totals: BatchTotals,
    pub archives: Vec<ArchiveReport>,
}

impl BatchResult {
    /// Archives that ended in `failed`
    pub fn failed_archives(&self) -> impl Iterator<Item = &ArchiveReport> {
        self.archives.iter().filter(|a| a.is_failed())
    }

    /// Report for the archive with the given file name
    pub fn archive(&self, name: &str) -> Option<&ArchiveReport> {
        self.archives.iter().find(|a| a.archive == name)
    }
}
