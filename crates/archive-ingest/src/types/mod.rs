//! Core types for the ingestion pipeline

pub mod archive;
pub mod batch;
pub mod file_record;

pub use archive::ArchiveInfo;
pub use batch::{
    ArchiveReport, ArchiveStage, BatchContext, BatchCounters, BatchResult, BatchTotals, FileIssue,
};
pub use file_record::{FileInspection, FileRecord, SkipReason, SkippedFile};
