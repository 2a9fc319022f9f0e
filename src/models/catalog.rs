use chrono::{DateTime, Utc};

pub type ThreadId = u64;
pub type SubscriberId = u64;

/// A tracked thread as persisted in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub thread_id: ThreadId,
    pub title: String,
    pub url: String,
    pub last_updated: DateTime<Utc>,
}

impl CatalogEntry {
    /// Whether `candidate` carries a strictly later timestamp than this entry.
    /// Equal timestamps count as unchanged.
    pub fn is_stale_against(&self, candidate: &CandidateEntry) -> bool {
        candidate.last_updated > self.last_updated
    }
}

impl std::fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) @ {}", self.title, self.thread_id, self.last_updated.format("%Y-%m-%d"))
    }
}

/// A normalized feed item that has not been reconciled against the catalog yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEntry {
    pub thread_id: ThreadId,
    pub title: String,
    pub url: String,
    pub last_updated: DateTime<Utc>,
}

impl From<CandidateEntry> for CatalogEntry {
    fn from(candidate: CandidateEntry) -> Self {
        Self {
            thread_id: candidate.thread_id,
            title: candidate.title,
            url: candidate.url,
            last_updated: candidate.last_updated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchlistEdge {
    pub subscriber_id: SubscriberId,
    pub thread_id: ThreadId,
}

/// Published once per reconciliation pass that inserted or updated entries.
#[derive(Debug, Clone)]
pub struct CatalogChanged {
    pub entries: Vec<CatalogEntry>,
}
