use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::{candidates, parse_document, FeedDocument, FeedFetcher};
use crate::models::{CatalogChanged, CatalogEntry, ThreadId};
use crate::notify::NotificationQueue;

use super::fanout::build_notifications;
use super::reconciler::CatalogReconciler;

const EVENT_CAPACITY: usize = 16;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub changed: usize,
    pub notifications: usize,
    pub failed_feeds: usize,
}

/// Drives fetch, normalize, reconcile and fan-out on a fixed cadence.
pub struct FeedMonitor {
    fetcher: FeedFetcher,
    reconciler: Arc<CatalogReconciler>,
    repository: Arc<Repository>,
    queue: NotificationQueue,
    events: broadcast::Sender<CatalogChanged>,
    feed_urls: Vec<String>,
    poll_interval: Duration,
}

impl FeedMonitor {
    pub fn new(
        config: &Config,
        reconciler: Arc<CatalogReconciler>,
        repository: Arc<Repository>,
        queue: NotificationQueue,
    ) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            fetcher: FeedFetcher::new(config)?,
            reconciler,
            repository,
            queue,
            events,
            feed_urls: config.feed_urls.clone(),
            poll_interval: config.poll_interval(),
        })
    }

    /// Receive a [`CatalogChanged`] for every pass that changed the catalog.
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogChanged> {
        self.events.subscribe()
    }

    /// Run passes until cancelled. The first pass starts immediately; a pass
    /// never overlaps the next one.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Feed monitor started ({} source(s), every {} seconds)",
            self.feed_urls.len(),
            self.poll_interval.as_secs()
        );

        let mut timer = interval(self.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {
                    let summary = self.run_pass(&cancel).await;
                    debug!("Pass finished: {:?}", summary);
                }
            }
        }

        info!("Feed monitor stopped");
    }

    /// One full fetch, reconcile and notify cycle. Failures are logged per
    /// feed; nothing escapes.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> PassSummary {
        let mut summary = PassSummary::default();

        let documents = self.fetcher.fetch_all(&self.feed_urls, cancel).await;
        summary.failed_feeds = self.feed_urls.len() - documents.len();
        if cancel.is_cancelled() {
            return summary;
        }

        // Later feeds win when two feeds change the same thread.
        let mut changed: HashMap<ThreadId, CatalogEntry> = HashMap::new();
        for document in &documents {
            match self.reconcile_document(document).await {
                Ok(entries) => {
                    changed.extend(entries.into_iter().map(|e| (e.thread_id, e)));
                }
                Err(AppError::StoreConflict(reason)) => {
                    summary.failed_feeds += 1;
                    warn!(
                        "Concurrent catalog write while reconciling {}, retrying next pass: {}",
                        document.source, reason
                    );
                }
                Err(e) => {
                    summary.failed_feeds += 1;
                    error!("Failed to reconcile {}: {}", document.source, e);
                }
            }
        }

        if changed.is_empty() {
            debug!("No threads changed this pass");
            return summary;
        }

        let mut entries: Vec<CatalogEntry> = changed.into_values().collect();
        entries.sort_by_key(|e| e.thread_id);
        summary.changed = entries.len();
        info!("{} thread(s) changed this pass", entries.len());

        // No receivers is fine.
        let _ = self.events.send(CatalogChanged {
            entries: entries.clone(),
        });

        match self.notify_watchers(&entries).await {
            Ok(count) => summary.notifications = count,
            Err(e) => error!("Failed to look up watchers: {}", e),
        }
        summary
    }

    async fn reconcile_document(&self, document: &FeedDocument) -> Result<Vec<CatalogEntry>> {
        let feed = parse_document(&document.body)?;
        let batch: Vec<_> = candidates(&feed).collect();
        debug!("{} candidate(s) from {}", batch.len(), document.source);
        self.reconciler.reconcile(batch).await
    }

    async fn notify_watchers(&self, entries: &[CatalogEntry]) -> Result<usize> {
        let ids = entries.iter().map(|e| e.thread_id).collect();
        let edges = self.repository.watchers_of(ids).await?;

        let notifications = build_notifications(entries, &edges);
        let count = notifications.len();
        for notification in notifications {
            self.queue.enqueue(notification);
        }
        if count > 0 {
            info!("Queued {} notification(s)", count);
        }
        Ok(count)
    }
}
