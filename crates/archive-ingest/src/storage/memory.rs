//! In-memory document store

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::document_store::{DocumentStore, InsertOptions, InsertOutcome, RejectedDocument};
use crate::error::{Error, Result};
use crate::types::FileRecord;

/// Process-local store
///
/// Backs `--dry-run` and the test suite. Reachability and per-document
/// rejection can be toggled to exercise failure paths.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    records: RwLock<Vec<FileRecord>>,
    reachable: AtomicBool,
    rejected_hashes: RwLock<HashSet<String>>,
    insert_calls: AtomicUsize,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            reachable: AtomicBool::new(true),
            rejected_hashes: RwLock::new(HashSet::new()),
            insert_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate the store going away or coming back
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Reject any document with this content hash on insert
    pub fn reject_hash(&self, hash: impl Into<String>) {
        self.rejected_hashes.write().insert(hash.into());
    }

    /// Snapshot of everything stored
    pub fn records(&self) -> Vec<FileRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `insert_many` calls received
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::store_connection("in-memory store marked unreachable"))
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn field_value(record: &FileRecord, field: &str) -> Option<String> {
    match field {
        "file_hash" => Some(record.file_hash.clone()),
        "file_path" => Some(record.file_path.clone()),
        "file_name" => Some(record.file_name.clone()),
        "upload_batch_id" => Some(record.upload_batch_id.clone()),
        _ => serde_json::to_value(record)
            .ok()
            .and_then(|v| v.get(field).and_then(|f| f.as_str().map(String::from))),
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }

    async fn find_existing(&self, field: &str, values: &[String]) -> Result<HashSet<String>> {
        self.check_reachable()?;
        let wanted: HashSet<&str> = values.iter().map(String::as_str).collect();
        let records = self.records.read();
        Ok(records
            .iter()
            .filter_map(|r| field_value(r, field))
            .filter(|v| wanted.contains(v.as_str()))
            .collect())
    }

    async fn insert_many(&self, records: &[FileRecord], options: &InsertOptions) -> Result<InsertOutcome> {
        self.check_reachable()?;
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        let rejected_hashes = self.rejected_hashes.read();
        let mut stored = self.records.write();
        let mut outcome = InsertOutcome::default();

        for (index, record) in records.iter().enumerate() {
            if rejected_hashes.contains(&record.file_hash) {
                outcome.rejected.push(RejectedDocument {
                    index,
                    message: format!("document {} failed validation", record.file_path),
                });
                if options.ordered {
                    break;
                }
                continue;
            }
            stored.push(record.clone());
            outcome.inserted += 1;
        }

        Ok(outcome)
    }

    async fn count(&self) -> Result<u64> {
        self.check_reachable()?;
        Ok(self.records.read().len() as u64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::record;

    #[tokio::test]
    async fn test_insert_and_find_existing() {
        let store = InMemoryDocumentStore::new();
        let outcome = store
            .insert_many(&[record("a", "h1"), record("b", "h2")], &InsertOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(store.count().await.unwrap(), 2);

        let found = store
            .find_existing("file_hash", &["h2".to_string(), "h3".to_string()])
            .await
            .unwrap();
        assert_eq!(found, HashSet::from(["h2".to_string()]));

        let by_path = store.find_existing("file_path", &["a".to_string()]).await.unwrap();
        assert!(by_path.contains("a"));
    }

    #[tokio::test]
    async fn test_rejection_continues_unless_ordered() {
        let store = InMemoryDocumentStore::new();
        store.reject_hash("bad");
        let batch = [record("a", "h1"), record("b", "bad"), record("c", "h3")];

        let outcome = store.insert_many(&batch, &InsertOptions::default()).await.unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].index, 1);

        let ordered = InsertOptions {
            ordered: true,
            ..Default::default()
        };
        let store = InMemoryDocumentStore::new();
        store.reject_hash("bad");
        let outcome = store.insert_many(&batch, &ordered).await.unwrap();
        assert_eq!(outcome.inserted, 1);
    }

    #[tokio::test]
    async fn test_unreachable() {
        let store = InMemoryDocumentStore::new();
        store.set_reachable(false);
        assert!(matches!(store.ping().await, Err(Error::StoreConnection(_))));
        assert!(store.count().await.is_err());
    }
}
