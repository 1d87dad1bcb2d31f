//! Chunked bulk insertion

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::document_store::{DocumentStore, InsertOptions};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::types::FileRecord;

/// A record that was not persisted, by index into the written slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedWrite {
    pub index: usize,
    pub message: String,
}

/// Result of writing one archive's records
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub inserted: usize,
    pub bytes_written: u64,
    pub failed: Vec<FailedWrite>,
    pub chunks: usize,
    /// Connection loss that stopped the remaining chunks
    pub aborted: Option<Error>,
}

/// Writes records through one insert-many call per chunk
#[derive(Debug, Clone)]
pub struct StoreWriter {
    chunk_size: usize,
    timeout: Duration,
    options: InsertOptions,
}

impl StoreWriter {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            timeout: config.timeout(),
            options: InsertOptions {
                ordered: config.ordered_inserts,
                bypass_document_validation: config.bypass_document_validation,
            },
        }
    }

    /// Insert `records`, continuing past rejected documents and failed chunks
    ///
    /// A connection error stops the write; every record from the failing
    /// chunk onward is reported failed and the error is returned in
    /// [`WriteOutcome::aborted`].
    pub async fn write(&self, store: &Arc<dyn DocumentStore>, records: &[FileRecord]) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();

        for (chunk_no, chunk) in records.chunks(self.chunk_size).enumerate() {
            let offset = chunk_no * self.chunk_size;
            outcome.chunks += 1;

            match self.insert_chunk(store, chunk).await {
                Ok(result) => {
                    let rejected: HashMap<usize, String> = result
                        .rejected
                        .into_iter()
                        .map(|r| (r.index, r.message))
                        .collect();

                    for (i, record) in chunk.iter().enumerate() {
                        let persisted = if self.options.ordered {
                            i < result.inserted
                        } else {
                            !rejected.contains_key(&i)
                        };
                        if persisted {
                            outcome.inserted += 1;
                            outcome.bytes_written += record.file_size_bytes;
                        } else {
                            let message = rejected
                                .get(&i)
                                .cloned()
                                .unwrap_or_else(|| "not attempted after an earlier rejection".to_string());
                            tracing::warn!(file = %record.file_path, reason = %message, "document rejected");
                            outcome.failed.push(FailedWrite {
                                index: offset + i,
                                message,
                            });
                        }
                    }
                }
                Err(err @ Error::StoreConnection(_)) => {
                    tracing::error!(chunk = chunk_no, error = %err, "store connection lost, aborting write");
                    let message = err.to_string();
                    outcome.failed.extend((offset..records.len()).map(|index| FailedWrite {
                        index,
                        message: message.clone(),
                    }));
                    outcome.aborted = Some(err);
                    break;
                }
                Err(err) => {
                    tracing::warn!(chunk = chunk_no, size = chunk.len(), error = %err, "chunk write failed");
                    let message = err.to_string();
                    outcome.failed.extend((offset..offset + chunk.len()).map(|index| FailedWrite {
                        index,
                        message: message.clone(),
                    }));
                }
            }
        }

        tracing::debug!(
            inserted = outcome.inserted,
            failed = outcome.failed.len(),
            chunks = outcome.chunks,
            "write finished"
        );
        outcome
    }

    async fn insert_chunk(
        &self,
        store: &Arc<dyn DocumentStore>,
        chunk: &[FileRecord],
    ) -> Result<super::document_store::InsertOutcome> {
        tokio::time::timeout(self.timeout, store.insert_many(chunk, &self.options))
            .await
            .map_err(|_| Error::timeout("insert_many", self.timeout.as_secs()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDocumentStore;
    use crate::test_support::{record, StallingStore};

    fn writer(chunk_size: usize, ordered: bool) -> StoreWriter {
        StoreWriter::new(&StoreConfig {
            chunk_size,
            ordered_inserts: ordered,
            ..Default::default()
        })
    }

    fn records(n: usize) -> Vec<FileRecord> {
        (0..n)
            .map(|i| record(&format!("f{}.txt", i), &format!("h{}", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_chunked_insert() {
        let memory = Arc::new(InMemoryDocumentStore::new());
        let store: Arc<dyn DocumentStore> = memory.clone();

        let outcome = writer(2, false).write(&store, &records(5)).await;
        assert_eq!(outcome.inserted, 5);
        assert_eq!(outcome.chunks, 3);
        assert_eq!(memory.insert_calls(), 3);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.bytes_written, 5 * 10);
    }

    #[tokio::test]
    async fn test_rejected_document_does_not_block_chunk() {
        let memory = Arc::new(InMemoryDocumentStore::new());
        memory.reject_hash("h1");
        let store: Arc<dyn DocumentStore> = memory.clone();

        let outcome = writer(10, false).write(&store, &records(3)).await;
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].index, 1);
        assert!(outcome.aborted.is_none());
        assert_eq!(memory.len(), 2);
    }

    #[tokio::test]
    async fn test_ordered_stops_at_rejection() {
        let memory = Arc::new(InMemoryDocumentStore::new());
        memory.reject_hash("h1");
        let store: Arc<dyn DocumentStore> = memory.clone();

        let outcome = writer(10, true).write(&store, &records(3)).await;
        assert_eq!(outcome.inserted, 1);
        assert_eq!(
            outcome.failed.iter().map(|f| f.index).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn test_connection_loss_aborts() {
        let memory = Arc::new(InMemoryDocumentStore::new());
        memory.set_reachable(false);
        let store: Arc<dyn DocumentStore> = memory.clone();

        let outcome = writer(2, false).write(&store, &records(5)).await;
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.chunks, 1);
        assert_eq!(outcome.failed.len(), 5);
        assert!(matches!(outcome.aborted, Some(Error::StoreConnection(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_chunk_times_out_and_write_continues() {
        let stalling = Arc::new(StallingStore::new(0, 1));
        let store: Arc<dyn DocumentStore> = stalling.clone();
        let writer = StoreWriter::new(&StoreConfig {
            chunk_size: 2,
            timeout_secs: 1,
            ..Default::default()
        });

        let outcome = writer.write(&store, &records(4)).await;
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.chunks, 2);
        assert_eq!(
            outcome.failed,
            vec![
                FailedWrite { index: 0, message: "insert_many timed out after 1s".into() },
                FailedWrite { index: 1, message: "insert_many timed out after 1s".into() },
            ]
        );
        assert!(outcome.aborted.is_none());
        assert_eq!(stalling.inner.len(), 2);
    }
}
