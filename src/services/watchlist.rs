use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::canonical_thread_url;
use crate::models::{CatalogEntry, SubscriberId, ThreadId};
use crate::pipeline::CatalogReconciler;

/// Result of a `watch` request, one bucket per outcome.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchReport {
    pub added: Vec<CatalogEntry>,
    pub already_watched: Vec<CatalogEntry>,
    pub invalid: Vec<String>,
    pub over_limit: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnwatchReport {
    pub removed: Vec<CatalogEntry>,
    pub not_watched: Vec<String>,
    pub invalid: Vec<String>,
}

fn write_section<T: fmt::Display>(f: &mut fmt::Formatter<'_>, heading: &str, items: &[T]) -> fmt::Result {
    if items.is_empty() {
        return Ok(());
    }
    writeln!(f, "{}:", heading)?;
    for item in items {
        writeln!(f, "- {}", item)?;
    }
    Ok(())
}

impl fmt::Display for WatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_section(f, "Threads added", &self.added)?;
        write_section(f, "Threads already in watchlist", &self.already_watched)?;
        write_section(f, "Not thread links", &self.invalid)?;
        write_section(f, "Watchlist full, not added", &self.over_limit)?;
        write_section(f, "Could not look up", &self.failed)
    }
}

impl fmt::Display for UnwatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_section(f, "Threads removed", &self.removed)?;
        write_section(f, "Threads not in watchlist", &self.not_watched)?;
        write_section(f, "Not thread links", &self.invalid)
    }
}

/// Subscriber and watchlist management. Every change is an explicit row
/// insert or delete against the watchlist relation.
pub struct WatchlistService {
    repository: Arc<Repository>,
    reconciler: Arc<CatalogReconciler>,
    config: Config,
}

impl WatchlistService {
    pub fn new(config: &Config, repository: Arc<Repository>, reconciler: Arc<CatalogReconciler>) -> Self {
        Self {
            repository,
            reconciler,
            config: config.clone(),
        }
    }

    /// Register a subscriber. Already registered is not an error.
    pub async fn enable(&self, subscriber: SubscriberId) -> Result<bool> {
        let added = self.repository.add_subscriber(subscriber).await?;
        if added {
            info!("Enabled subscriber {}", subscriber);
        }
        Ok(added)
    }

    /// Remove a subscriber together with their watchlist.
    pub async fn disable(&self, subscriber: SubscriberId) -> Result<bool> {
        let removed = self.repository.remove_subscriber(subscriber).await?;
        if removed {
            info!("Disabled subscriber {}", subscriber);
        }
        Ok(removed)
    }

    pub async fn watch(&self, subscriber: SubscriberId, urls: &[String]) -> Result<WatchReport> {
        self.ensure_subscriber(subscriber).await?;

        let mut watched: HashMap<ThreadId, CatalogEntry> = self
            .repository
            .watchlist(subscriber)
            .await?
            .into_iter()
            .map(|e| (e.thread_id, e))
            .collect();
        let privileged = self.config.is_privileged(subscriber);
        let mut report = WatchReport::default();

        for url in urls {
            let Some((_, thread_id)) = canonical_thread_url(url) else {
                report.invalid.push(url.clone());
                continue;
            };

            if let Some(entry) = watched.get(&thread_id) {
                report.already_watched.push(entry.clone());
                continue;
            }

            if !privileged && watched.len() >= self.config.watchlist_limit {
                report.over_limit.push(url.clone());
                continue;
            }

            let entry = match self.reconciler.lookup_or_fetch(url).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Could not resolve {} for subscriber {}: {}", url, subscriber, e);
                    report.failed.push(url.clone());
                    continue;
                }
            };

            self.repository.add_watch(subscriber, entry.thread_id).await?;
            watched.insert(entry.thread_id, entry.clone());
            report.added.push(entry);
        }

        if !report.added.is_empty() {
            info!("Subscriber {} now watches {} more thread(s)", subscriber, report.added.len());
        }
        Ok(report)
    }

    pub async fn unwatch(&self, subscriber: SubscriberId, urls: &[String]) -> Result<UnwatchReport> {
        self.ensure_subscriber(subscriber).await?;

        let mut report = UnwatchReport::default();
        for url in urls {
            let Some((_, thread_id)) = canonical_thread_url(url) else {
                report.invalid.push(url.clone());
                continue;
            };

            let removed = self.repository.remove_watch(subscriber, thread_id).await?;
            match self.repository.get_thread(thread_id).await? {
                Some(entry) if removed => report.removed.push(entry),
                _ => report.not_watched.push(url.clone()),
            }
        }
        Ok(report)
    }

    /// Watched threads, most recently updated first.
    pub async fn list(&self, subscriber: SubscriberId) -> Result<Vec<CatalogEntry>> {
        self.ensure_subscriber(subscriber).await?;
        self.repository.watchlist(subscriber).await
    }

    async fn ensure_subscriber(&self, subscriber: SubscriberId) -> Result<()> {
        if self.repository.subscriber_exists(subscriber).await? {
            Ok(())
        } else {
            Err(AppError::SubscriberNotFound(subscriber))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{day, thread, FakeLookup};

    async fn service(config: Config, lookup: FakeLookup) -> (Arc<Repository>, WatchlistService) {
        let repository = Arc::new(Repository::open_in_memory().await.unwrap());
        let reconciler = Arc::new(CatalogReconciler::new(repository.clone(), Arc::new(lookup)));
        let service = WatchlistService::new(&config, repository.clone(), reconciler);
        (repository, service)
    }

    fn urls(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn unknown_subscriber_is_rejected() {
        let (_, service) = service(Config::default(), FakeLookup::default()).await;
        assert!(matches!(
            service.watch(5, &urls(&["https://f95zone.to/threads/1"])).await,
            Err(AppError::SubscriberNotFound(5))
        ));
        assert!(matches!(service.list(5).await, Err(AppError::SubscriberNotFound(5))));
    }

    #[tokio::test]
    async fn enable_and_disable_are_idempotent() {
        let (repository, service) = service(Config::default(), FakeLookup::default()).await;
        assert!(service.enable(5).await.unwrap());
        assert!(!service.enable(5).await.unwrap());

        repository
            .insert_thread_if_absent(thread(1, "One", day(2024, 1, 1)))
            .await
            .unwrap();
        repository.add_watch(5, 1).await.unwrap();

        assert!(service.disable(5).await.unwrap());
        assert!(!service.disable(5).await.unwrap());
        assert!(repository.watchers_of(vec![1]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn watch_sorts_urls_into_buckets() {
        let lookup = FakeLookup::default().with_page("https://f95zone.to/threads/2", "Two", day(2024, 2, 2));
        let (repository, service) = service(Config::default(), lookup).await;
        service.enable(5).await.unwrap();
        repository
            .insert_thread_if_absent(thread(1, "One", day(2024, 1, 1)))
            .await
            .unwrap();

        let report = service
            .watch(
                5,
                &urls(&[
                    "https://f95zone.to/threads/one.1/",
                    "https://example.com/nope",
                    "https://f95zone.to/threads/two.2/post-9",
                    "https://f95zone.to/threads/1",
                    "https://f95zone.to/threads/three.3/",
                ]),
            )
            .await
            .unwrap();

        assert_eq!(
            report.added,
            vec![thread(1, "One", day(2024, 1, 1)), thread(2, "Two", day(2024, 2, 2))]
        );
        assert_eq!(report.already_watched, vec![thread(1, "One", day(2024, 1, 1))]);
        assert_eq!(report.invalid, urls(&["https://example.com/nope"]));
        assert_eq!(report.failed, urls(&["https://f95zone.to/threads/three.3/"]));
        assert!(report.over_limit.is_empty());

        let rendered = report.to_string();
        assert!(rendered.starts_with("Threads added:\n"));
        assert!(rendered.contains("Threads already in watchlist:\n- One (1)"));

        let listed = service.list(5).await.unwrap();
        assert_eq!(listed.iter().map(|e| e.thread_id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn capacity_is_a_hard_limit_unless_privileged() {
        let config = Config {
            watchlist_limit: 1,
            privileged_users: vec![9],
            ..Config::default()
        };
        let (repository, service) = service(config, FakeLookup::default()).await;
        for id in [1, 2] {
            repository
                .insert_thread_if_absent(thread(id, "t", day(2024, 1, 1)))
                .await
                .unwrap();
        }
        service.enable(5).await.unwrap();
        service.enable(9).await.unwrap();
        let both = urls(&["https://f95zone.to/threads/1", "https://f95zone.to/threads/2"]);

        let report = service.watch(5, &both).await.unwrap();
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.over_limit, urls(&["https://f95zone.to/threads/2"]));
        assert_eq!(repository.watchlist(5).await.unwrap().len(), 1);

        let report = service.watch(9, &both).await.unwrap();
        assert_eq!(report.added.len(), 2);
        assert!(report.over_limit.is_empty());
    }

    #[tokio::test]
    async fn self_hosted_instances_have_no_limit() {
        let config = Config {
            watchlist_limit: 0,
            self_hosted: true,
            ..Config::default()
        };
        let (repository, service) = service(config, FakeLookup::default()).await;
        repository
            .insert_thread_if_absent(thread(1, "t", day(2024, 1, 1)))
            .await
            .unwrap();
        service.enable(5).await.unwrap();

        let report = service.watch(5, &urls(&["https://f95zone.to/threads/1"])).await.unwrap();
        assert_eq!(report.added.len(), 1);
        assert!(report.over_limit.is_empty());
    }

    #[tokio::test]
    async fn unwatch_deletes_only_existing_edges() {
        let (repository, service) = service(Config::default(), FakeLookup::default()).await;
        service.enable(5).await.unwrap();
        repository
            .insert_thread_if_absent(thread(1, "One", day(2024, 1, 1)))
            .await
            .unwrap();
        repository.add_watch(5, 1).await.unwrap();

        let report = service
            .unwatch(
                5,
                &urls(&["https://f95zone.to/threads/one.1/", "https://f95zone.to/threads/4", "junk"]),
            )
            .await
            .unwrap();
        assert_eq!(report.removed, vec![thread(1, "One", day(2024, 1, 1))]);
        assert_eq!(report.not_watched, urls(&["https://f95zone.to/threads/4"]));
        assert_eq!(report.invalid, urls(&["junk"]));
        assert!(service.list(5).await.unwrap().is_empty());
    }
}
