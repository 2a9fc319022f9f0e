use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::db::{CatalogChanges, Repository, ThreadUpdate};
use crate::error::{AppError, Result};
use crate::feed::canonical_thread_url;
use crate::models::{CandidateEntry, CatalogEntry, ThreadId};
use crate::services::MetadataLookup;

/// Collapse repeated thread ids to the freshest candidate. On equal
/// timestamps the first occurrence wins. Input order is otherwise kept.
pub fn dedupe_candidates(candidates: impl IntoIterator<Item = CandidateEntry>) -> Vec<CandidateEntry> {
    let mut index: HashMap<ThreadId, usize> = HashMap::new();
    let mut unique: Vec<CandidateEntry> = Vec::new();

    for candidate in candidates {
        match index.get(&candidate.thread_id) {
            Some(&i) => {
                if candidate.last_updated > unique[i].last_updated {
                    unique[i] = candidate;
                }
            }
            None => {
                index.insert(candidate.thread_id, unique.len());
                unique.push(candidate);
            }
        }
    }
    unique
}

/// Partition a deduplicated batch against the persisted rows for the same ids.
///
/// Unknown ids become inserts; known ids become updates only when the
/// candidate is strictly newer, taking over both title and timestamp.
pub fn diff(batch: Vec<CandidateEntry>, existing: &[CatalogEntry]) -> CatalogChanges {
    let persisted: HashMap<ThreadId, &CatalogEntry> =
        existing.iter().map(|e| (e.thread_id, e)).collect();
    let mut changes = CatalogChanges::default();

    for candidate in batch {
        match persisted.get(&candidate.thread_id) {
            None => changes.inserts.push(candidate.into()),
            Some(current) if current.is_stale_against(&candidate) => {
                let previous_updated = current.last_updated;
                changes.updates.push(ThreadUpdate {
                    entry: CatalogEntry {
                        // The stored URL is immutable once created.
                        url: current.url.clone(),
                        ..CatalogEntry::from(candidate)
                    },
                    previous_updated,
                });
            }
            Some(_) => {}
        }
    }
    changes
}

/// Sole writer of catalog rows.
pub struct CatalogReconciler {
    repository: Arc<Repository>,
    lookup: Arc<dyn MetadataLookup>,
}

impl CatalogReconciler {
    pub fn new(repository: Arc<Repository>, lookup: Arc<dyn MetadataLookup>) -> Self {
        Self { repository, lookup }
    }

    /// Diff one feed's candidates against the catalog and commit the result in
    /// a single transaction. Returns the entries that were inserted or updated.
    pub async fn reconcile(&self, candidates: Vec<CandidateEntry>) -> Result<Vec<CatalogEntry>> {
        let batch = dedupe_candidates(candidates);
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<ThreadId> = batch.iter().map(|c| c.thread_id).collect();
        let to_check = self.repository.threads_by_ids(ids).await?;
        trace!("To check: {:?}", to_check);

        let changes = diff(batch, &to_check);
        if changes.is_empty() {
            debug!("No catalog changes in batch");
            return Ok(Vec::new());
        }

        if !changes.inserts.is_empty() {
            info!(
                "Adding [{}] to catalog",
                join_display(changes.inserts.iter())
            );
        }
        if !changes.updates.is_empty() {
            info!(
                "Updating threads: {}",
                join_display(changes.updates.iter().map(|u| &u.entry))
            );
        }

        self.repository.apply_changes(changes).await
    }

    /// Existing catalog entry for `url`, or a new one built from a one-off
    /// metadata lookup and stored right away.
    pub async fn lookup_or_fetch(&self, url: &str) -> Result<CatalogEntry> {
        let (canonical, thread_id) = canonical_thread_url(url)
            .ok_or_else(|| AppError::Lookup(format!("not a thread URL: {}", url)))?;

        if let Some(entry) = self.repository.get_thread(thread_id).await? {
            return Ok(entry);
        }

        let metadata = self.lookup.fetch_metadata(&canonical).await?;
        let entry = CatalogEntry {
            thread_id,
            title: metadata.title,
            url: canonical,
            last_updated: metadata.last_updated,
        };
        self.repository.insert_thread_if_absent(entry).await
    }
}

fn join_display<'a>(entries: impl Iterator<Item = &'a CatalogEntry>) -> String {
    entries.map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}
