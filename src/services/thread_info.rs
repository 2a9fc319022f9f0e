use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::error::{AppError, Result};

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

const MISSING_TITLE: &str = "Title Not Found";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMetadata {
    pub title: String,
    pub last_updated: DateTime<Utc>,
}

/// One-off lookup of a thread that isn't in the catalog yet.
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn fetch_metadata(&self, url: &str) -> Result<ThreadMetadata>;
}

/// Scrapes title and last-update date from the thread page itself.
pub struct ThreadInfoProvider {
    client: Client,
    permits: Semaphore,
}

impl ThreadInfoProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT_STRING)
            .build()?;
        Ok(Self {
            client,
            permits: Semaphore::new(config.lookup_concurrency),
        })
    }
}

#[async_trait]
impl MetadataLookup for ThreadInfoProvider {
    async fn fetch_metadata(&self, url: &str) -> Result<ThreadMetadata> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| AppError::Lookup(e.to_string()))?;

        tracing::debug!("Getting info on {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Lookup(format!("{}: HTTP {}", url, response.status())));
        }

        let html = response.text().await?;
        let metadata = parse_thread_page(&html);
        tracing::debug!("Retrieved {:?} for {}", metadata, url);
        Ok(metadata)
    }
}

fn updated_regex() -> &'static Regex {
    static UPDATED_REGEX: OnceLock<Regex> = OnceLock::new();
    UPDATED_REGEX.get_or_init(|| {
        Regex::new(r"(?i)<b>(?:thread)?\s*updated?[</b>: ]+([0-9]{4}-[0-9]{2}-[0-9]{2})\s*<br")
            .expect("updated pattern is valid")
    })
}

/// Extract metadata from a thread page. Missing pieces fall back to
/// placeholder values so the thread can still be tracked.
pub fn parse_thread_page(html: &str) -> ThreadMetadata {
    let document = Html::parse_document(html);
    let title = Selector::parse(r#"meta[property="og:title"]"#)
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|meta| meta.value().attr("content"))
                .map(|content| content.trim().to_string())
        })
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| MISSING_TITLE.to_string());

    let last_updated = updated_regex()
        .captures(html)
        .and_then(|c| NaiveDate::parse_from_str(&c[1], "%Y-%m-%d").ok())
        .unwrap_or_else(fallback_date)
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc();

    ThreadMetadata {
        title,
        last_updated,
    }
}

fn fallback_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{day, serve_static};

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Bar [v2] | F95zone</title>
  <meta property="og:title" content="Bar &amp; Baz [v2]" />
</head>
<body>
  <div class="bbWrapper">
    <b>Thread Updated</b>: 2024-01-05<br />
    <b>Release Date</b>: 2023-12-01<br />
  </div>
</body>
</html>"#;

    #[test]
    fn parses_title_and_update_date() {
        let metadata = parse_thread_page(PAGE);
        assert_eq!(metadata.title, "Bar & Baz [v2]");
        assert_eq!(metadata.last_updated, day(2024, 1, 5));
    }

    #[test]
    fn missing_markers_fall_back() {
        let metadata = parse_thread_page("<html><body>nothing here</body></html>");
        assert_eq!(metadata.title, MISSING_TITLE);
        assert_eq!(metadata.last_updated, day(2000, 1, 1));
    }

    #[tokio::test]
    async fn fetches_over_http() {
        let base = serve_static(200, PAGE).await;
        let provider = ThreadInfoProvider::new(&Config::default()).unwrap();
        let metadata = provider
            .fetch_metadata(&format!("{}/threads/7", base))
            .await
            .unwrap();
        assert_eq!(metadata.title, "Bar & Baz [v2]");
    }

    #[tokio::test]
    async fn http_errors_are_lookup_failures() {
        let base = serve_static(404, "gone").await;
        let provider = ThreadInfoProvider::new(&Config::default()).unwrap();
        let result = provider.fetch_metadata(&format!("{}/threads/7", base)).await;
        assert!(matches!(result, Err(AppError::Lookup(_))));
    }
}
