use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{CatalogEntry, SubscriberId};
use crate::notify::{notification_queue, DeliveryStats, DeliveryWorker, Messenger, NotificationReceiver};
use crate::pipeline::{CatalogReconciler, FeedMonitor, PassSummary};
use crate::services::{
    DiscordMessenger, ThreadInfoProvider, UnwatchReport, WatchReport, WatchlistService,
};

/// Owns every long-lived component, wired from one [`Config`].
pub struct App {
    monitor: FeedMonitor,
    receiver: NotificationReceiver,
    watchlist: WatchlistService,
    bot_token: Option<String>,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let repository = Arc::new(Repository::new(&config.db_path).await?);
        Self::with_repository(config, repository)
    }

    fn with_repository(config: &Config, repository: Arc<Repository>) -> Result<Self> {
        let lookup = Arc::new(ThreadInfoProvider::new(config)?);
        let reconciler = Arc::new(CatalogReconciler::new(repository.clone(), lookup));
        let (queue, receiver) = notification_queue();

        Ok(Self {
            monitor: FeedMonitor::new(config, reconciler.clone(), repository.clone(), queue)?,
            receiver,
            watchlist: WatchlistService::new(config, repository, reconciler),
            bot_token: config.bot_token.clone(),
        })
    }

    fn messenger(&self) -> Result<Arc<dyn Messenger>> {
        let token = self
            .bot_token
            .clone()
            .ok_or_else(|| AppError::Config("bot_token is not set".into()))?;
        Ok(Arc::new(DiscordMessenger::new(token)?))
    }

    /// Poll feeds and deliver notifications until `cancel` fires.
    pub async fn run_service(self, cancel: CancellationToken) -> Result<()> {
        let messenger = self.messenger()?;
        let Self {
            monitor, receiver, ..
        } = self;

        let worker = tokio::spawn(DeliveryWorker::new(receiver, messenger).run(cancel.clone()));
        monitor.run(cancel).await;

        let stats = worker.await.map_err(|e| anyhow::anyhow!(e))?;
        info!("Shut down after delivering {} notification(s)", stats.delivered);
        Ok(())
    }

    /// Run one pass, then wait until every queued notification was attempted.
    pub async fn run_once(self, cancel: CancellationToken) -> Result<(PassSummary, DeliveryStats)> {
        let messenger = self.messenger()?;
        let Self {
            monitor, receiver, ..
        } = self;

        let worker = tokio::spawn(DeliveryWorker::new(receiver, messenger).run(cancel.clone()));
        let summary = monitor.run_pass(&cancel).await;
        // Dropping the monitor closes the queue so the worker drains and exits.
        drop(monitor);

        let stats = worker.await.map_err(|e| anyhow::anyhow!(e))?;
        Ok((summary, stats))
    }

    pub async fn enable(&self, subscriber: SubscriberId) -> Result<bool> {
        self.watchlist.enable(subscriber).await
    }

    pub async fn disable(&self, subscriber: SubscriberId) -> Result<bool> {
        self.watchlist.disable(subscriber).await
    }

    pub async fn watch(&self, subscriber: SubscriberId, urls: &[String]) -> Result<WatchReport> {
        self.watchlist.watch(subscriber, urls).await
    }

    pub async fn unwatch(&self, subscriber: SubscriberId, urls: &[String]) -> Result<UnwatchReport> {
        self.watchlist.unwatch(subscriber, urls).await
    }

    pub async fn list(&self, subscriber: SubscriberId) -> Result<Vec<CatalogEntry>> {
        self.watchlist.list(subscriber).await
    }
}
