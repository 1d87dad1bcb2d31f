//! Batch orchestration over discovered archives

mod discovery;
mod orchestrator;

pub use discovery::discover_archives;
pub use orchestrator::{PipelineOrchestrator, ProgressCallback};
