//! Archive ingestion: validate, extract, inspect, build records

pub mod extractor;
pub mod inspector;
pub mod record_builder;
pub mod validator;

pub use extractor::{ArchiveExtractor, EntryFailure, ExtractedFile, ExtractionArea, ExtractionReport};
pub use inspector::FileInspector;
pub use record_builder::{ArchiveContext, BatchRecordBuilder};
pub use validator::ArchiveValidator;
