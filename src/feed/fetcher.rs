use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::rate_limit::TimedSemaphore;

/// Raw body of one syndication source, not parsed yet.
#[derive(Debug, Clone)]
pub struct FeedDocument {
    pub source: String,
    pub body: Vec<u8>,
}

pub struct FeedFetcher {
    client: Client,
    limiter: TimedSemaphore,
    concurrency: usize,
}

impl FeedFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("thread-watch/1.0")
            .build()?;

        Ok(Self {
            client,
            limiter: TimedSemaphore::new(config.fetch_concurrency, config.fetch_window()),
            concurrency: config.fetch_concurrency,
        })
    }

    pub async fn fetch_document(&self, url: &str) -> Result<FeedDocument> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        Ok(FeedDocument {
            source: url.to_string(),
            body: bytes.to_vec(),
        })
    }

    /// Fetch every source, each one gated by the timed semaphore.
    ///
    /// Failed sources are logged and left out of the result. Cancellation
    /// stops waiting for permits and abandons in-flight requests.
    pub async fn fetch_all(&self, urls: &[String], cancel: &CancellationToken) -> Vec<FeedDocument> {
        let pending: Vec<_> = urls.iter().map(|url| self.fetch_one(url, cancel)).collect();

        stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .filter_map(|r| async { r })
            .collect()
            .await
    }

    async fn fetch_one(&self, url: &str, cancel: &CancellationToken) -> Option<FeedDocument> {
        let fetched = async {
            self.limiter.acquire(cancel).await?;
            tracing::trace!("{} fetch slot(s) left in window", self.limiter.available());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AppError::Cancelled),
                doc = self.fetch_document(url) => doc,
            }
        }
        .await;

        match fetched {
            Ok(doc) => {
                tracing::debug!("Fetched {} bytes from {}", doc.body.len(), url);
                Some(doc)
            }
            Err(AppError::Cancelled) => {
                tracing::debug!("Fetch of {} cancelled", url);
                None
            }
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", url, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_static;

    fn test_config() -> Config {
        Config {
            fetch_concurrency: 2,
            fetch_window_secs: 1,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn failed_sources_do_not_sink_the_batch() {
        let good = serve_static(200, "<rss version=\"2.0\"><channel></channel></rss>").await;
        let bad_status = serve_static(500, "oops").await;
        let fetcher = FeedFetcher::new(&test_config()).unwrap();

        let urls = vec![
            "not a url".to_string(),
            format!("{}/feed", bad_status),
            format!("{}/feed", good),
        ];
        let docs = fetcher.fetch_all(&urls, &CancellationToken::new()).await;

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, format!("{}/feed", good));
        assert!(docs[0].body.starts_with(b"<rss"));
    }

    #[tokio::test]
    async fn cancelled_batch_returns_nothing() {
        let good = serve_static(200, "<rss/>").await;
        let fetcher = FeedFetcher::new(&test_config()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let docs = fetcher.fetch_all(&[format!("{}/feed", good)], &cancel).await;
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn batch_runs_on_a_spawned_task() {
        let good = serve_static(200, "<rss version=\"2.0\"><channel></channel></rss>").await;
        let fetcher = std::sync::Arc::new(FeedFetcher::new(&test_config()).unwrap());
        let cancel = CancellationToken::new();
        let urls = vec![format!("{}/a", good), format!("{}/b", good)];

        let handle = tokio::spawn({
            let fetcher = fetcher.clone();
            let cancel = cancel.clone();
            async move { fetcher.fetch_all(&urls, &cancel).await }
        });

        let docs = handle.await.unwrap();
        assert_eq!(docs.len(), 2);
    }
}
