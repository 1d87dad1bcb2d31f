//! Document store trait the pipeline writes records through

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::FileRecord;

/// Options for one bulk insert call
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertOptions {
    /// Stop at the first rejected document
    pub ordered: bool,
    /// Skip server-side schema validation
    pub bypass_document_validation: bool,
}

/// A document the store refused, by position in the submitted slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedDocument {
    pub index: usize,
    pub message: String,
}

/// Result of a bulk insert
///
/// Individual rejections do not fail the call; the rest of the chunk is
/// still inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub rejected: Vec<RejectedDocument>,
}

/// Trait for record persistence
///
/// Implementations:
/// - `InMemoryDocumentStore`: process-local, used for dry runs and tests
/// - `MongoDocumentStore`: MongoDB collection
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Check the store is reachable
    async fn ping(&self) -> Result<()>;

    /// Subset of `values` already stored under `field`
    ///
    /// Existence query only; documents are not fetched.
    async fn find_existing(&self, field: &str, values: &[String]) -> Result<HashSet<String>>;

    /// Insert many records in one call
    async fn insert_many(&self, records: &[FileRecord], options: &InsertOptions) -> Result<InsertOutcome>;

    /// Number of documents in the target collection
    async fn count(&self) -> Result<u64>;

    /// Get store name for logging
    fn name(&self) -> &str;
}
