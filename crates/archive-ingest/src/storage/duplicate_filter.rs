//! Skips records whose key is already stored or already claimed this run

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;

use super::document_store::DocumentStore;
use crate::config::{DuplicateKey, StoreConfig};
use crate::error::{Error, Result};
use crate::types::{FileRecord, SkipReason, SkippedFile};

/// Maximum values per `$in` existence query
const EXISTENCE_QUERY_CHUNK: usize = 1000;

/// Candidates split into the write set and the skipped set
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub accepted: Vec<FileRecord>,
    pub skipped: Vec<SkippedFile>,
}

/// Batched existence check against the store
///
/// Keys that pass are claimed for the rest of the run, so two archives
/// processed concurrently never both insert the same content. Keys of
/// records that end up not written are handed back with [`release`].
///
/// Dedup across concurrent archives is best-effort: if archive B skips a key
/// that archive A claimed and A's insert of it then fails, B's copy stays
/// skipped and the content is not stored by this run. A later run picks it
/// up, since the key is neither stored nor claimed any more.
///
/// [`release`]: DuplicateFilter::release
#[derive(Debug)]
pub struct DuplicateFilter {
    key: DuplicateKey,
    enabled: bool,
    timeout: Duration,
    claimed: DashSet<String>,
}

impl DuplicateFilter {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            key: config.duplicate_key,
            enabled: config.skip_duplicates,
            timeout: config.timeout(),
            claimed: DashSet::new(),
        }
    }

    pub fn key(&self) -> DuplicateKey {
        self.key
    }

    pub async fn filter(
        &self,
        store: &Arc<dyn DocumentStore>,
        candidates: Vec<FileRecord>,
    ) -> Result<FilterOutcome> {
        if !self.enabled || candidates.is_empty() {
            return Ok(FilterOutcome {
                accepted: candidates,
                skipped: Vec::new(),
            });
        }

        let values: Vec<String> = candidates
            .iter()
            .map(|r| r.key(self.key).to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let mut existing = HashSet::new();
        for chunk in values.chunks(EXISTENCE_QUERY_CHUNK) {
            let found = tokio::time::timeout(self.timeout, store.find_existing(self.key.field(), chunk))
                .await
                .map_err(|_| Error::timeout("duplicate check", self.timeout.as_secs()))??;
            existing.extend(found);
        }

        let mut outcome = FilterOutcome::default();
        for record in candidates {
            let key = record.key(self.key).to_string();
            if existing.contains(&key) || !self.claimed.insert(key.clone()) {
                tracing::debug!(file = %record.file_path, key = %key, "skipping duplicate");
                outcome.skipped.push(SkippedFile {
                    path: record.file_path,
                    reason: SkipReason::Duplicate { key },
                });
            } else {
                outcome.accepted.push(record);
            }
        }

        tracing::debug!(
            accepted = outcome.accepted.len(),
            skipped = outcome.skipped.len(),
            "duplicate filter applied"
        );
        Ok(outcome)
    }

    /// Un-claim keys of records that were not persisted
    pub fn release<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        for key in keys {
            self.claimed.remove(key);
        }
    }
}
