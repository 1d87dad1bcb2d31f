//! Document store access: backends, duplicate filtering and bulk writes
//!
//! The pipeline only talks to [`DocumentStore`]; the backend is chosen once
//! from configuration.

pub mod document_store;
pub mod duplicate_filter;
pub mod memory;
pub mod writer;

#[cfg(feature = "mongodb")]
pub mod mongo;

use std::sync::Arc;

pub use document_store::{DocumentStore, InsertOptions, InsertOutcome, RejectedDocument};
pub use duplicate_filter::{DuplicateFilter, FilterOutcome};
pub use memory::InMemoryDocumentStore;
pub use writer::{FailedWrite, StoreWriter, WriteOutcome};

#[cfg(feature = "mongodb")]
pub use mongo::MongoDocumentStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;

/// Create the configured store backend
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory document store");
            Ok(Arc::new(InMemoryDocumentStore::new()))
        }
        #[cfg(feature = "mongodb")]
        StoreBackend::MongoDb => Ok(Arc::new(MongoDocumentStore::connect(config).await?)),
        #[cfg(not(feature = "mongodb"))]
        StoreBackend::MongoDb => Err(crate::error::Error::Config(
            "built without the `mongodb` feature; use the memory backend".into(),
        )),
    }
}
