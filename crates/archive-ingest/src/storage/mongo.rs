//! MongoDB document store

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};

use super::document_store::{DocumentStore, InsertOptions, InsertOutcome, RejectedDocument};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::types::FileRecord;

const APP_NAME: &str = "archive-ingest";

/// Store backed by one MongoDB collection
pub struct MongoDocumentStore {
    client: Client,
    collection: Collection<FileRecord>,
    database: String,
}

impl MongoDocumentStore {
    /// Build a client from the configured URI
    ///
    /// No network traffic happens here; call [`DocumentStore::ping`] to
    /// confirm the cluster is reachable.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let uri = config
            .uri
            .as_deref()
            .ok_or_else(|| Error::Config("store.uri is required for the mongodb backend".into()))?;

        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| Error::Config(format!("invalid MongoDB URI: {}", e)))?;
        options.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
        options.server_selection_timeout = Some(Duration::from_secs(config.server_selection_timeout_secs));
        options.app_name = Some(APP_NAME.to_string());

        let client = Client::with_options(options).map_err(map_error)?;
        let collection = client
            .database(&config.database)
            .collection::<FileRecord>(&config.collection);

        tracing::info!(
            database = %config.database,
            collection = %config.collection,
            "MongoDB client initialized"
        );

        Ok(Self {
            client,
            collection,
            database: config.database.clone(),
        })
    }
}

/// Classify driver errors into connection and write failures
fn map_error(err: mongodb::error::Error) -> Error {
    match err.kind.as_ref() {
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. }
        | ErrorKind::DnsResolve { .. }
        | ErrorKind::Authentication { .. } => Error::store_connection(err.to_string()),
        _ => Error::store_write(err.to_string(), 0),
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn ping(&self) -> Result<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(map_error)?;
        tracing::debug!(database = %self.database, "MongoDB ping ok");
        Ok(())
    }

    async fn find_existing(&self, field: &str, values: &[String]) -> Result<HashSet<String>> {
        if values.is_empty() {
            return Ok(HashSet::new());
        }
        let mut filter = Document::new();
        filter.insert(field, doc! { "$in": values.to_vec() });

        let found = self
            .collection
            .distinct(field, filter)
            .await
            .map_err(map_error)?;

        Ok(found
            .into_iter()
            .filter_map(|v| match v {
                Bson::String(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    async fn insert_many(&self, records: &[FileRecord], options: &InsertOptions) -> Result<InsertOutcome> {
        if records.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let result = self
            .collection
            .insert_many(records)
            .ordered(options.ordered)
            .bypass_document_validation(options.bypass_document_validation)
            .await;

        match result {
            Ok(res) => Ok(InsertOutcome {
                inserted: res.inserted_ids.len(),
                rejected: Vec::new(),
            }),
            Err(err) => match err.kind.as_ref() {
                ErrorKind::InsertMany(failure) => {
                    if let Some(wce) = &failure.write_concern_error {
                        return Err(Error::store_write(wce.message.clone(), records.len()));
                    }
                    let rejected: Vec<RejectedDocument> = failure
                        .write_errors
                        .iter()
                        .flatten()
                        .map(|we| RejectedDocument {
                            index: we.index,
                            message: we.message.clone(),
                        })
                        .collect();
                    // Ordered inserts stop at the first rejected document
                    let inserted = if options.ordered {
                        rejected.iter().map(|r| r.index).min().unwrap_or(records.len())
                    } else {
                        records.len().saturating_sub(rejected.len())
                    };
                    Ok(InsertOutcome { inserted, rejected })
                }
                _ => Err(map_error(err)),
            },
        }
    }

    async fn count(&self) -> Result<u64> {
        self.collection
            .estimated_document_count()
            .await
            .map_err(map_error)
    }

    fn name(&self) -> &str {
        "mongodb"
    }
}
