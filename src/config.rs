use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::SubscriberId;

const BOT_TOKEN_ENV: &str = "THREAD_WATCH_BOT_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub bot_token: Option<String>,

    #[serde(default = "default_feed_urls")]
    pub feed_urls: Vec<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u32,

    /// Fetches allowed per `fetch_window_secs`.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    #[serde(default = "default_fetch_window")]
    pub fetch_window_secs: u64,

    #[serde(default = "default_lookup_concurrency")]
    pub lookup_concurrency: usize,

    #[serde(default = "default_watchlist_limit")]
    pub watchlist_limit: usize,

    /// Self-hosted instances lift the watchlist limit for everyone.
    #[serde(default)]
    pub self_hosted: bool,

    #[serde(default)]
    pub privileged_users: Vec<SubscriberId>,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("thread-watch");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("threads.db").to_string_lossy().to_string()
}

fn default_feed_urls() -> Vec<String> {
    vec![
        "https://f95zone.to/sam/latest_alpha/latest_data.php?cmd=rss&cat=games".to_string(),
    ]
}

fn default_poll_interval() -> u32 {
    5
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_fetch_window() -> u64 {
    60
}

fn default_lookup_concurrency() -> usize {
    5
}

fn default_watchlist_limit() -> usize {
    69
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            bot_token: None,
            feed_urls: default_feed_urls(),
            poll_interval_minutes: default_poll_interval(),
            fetch_concurrency: default_fetch_concurrency(),
            fetch_window_secs: default_fetch_window(),
            lookup_concurrency: default_lookup_concurrency(),
            watchlist_limit: default_watchlist_limit(),
            self_hosted: false,
            privileged_users: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `path` (or the default location), writing defaults on first run.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            config
        };

        if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
            if !token.is_empty() {
                config.bot_token = Some(token);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thread-watch")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_minutes == 0 {
            return Err(AppError::Config("poll_interval_minutes must be positive".into()));
        }
        if self.fetch_concurrency == 0 || self.lookup_concurrency == 0 {
            return Err(AppError::Config("concurrency caps must be positive".into()));
        }
        if self.fetch_window_secs == 0 {
            return Err(AppError::Config("fetch_window_secs must be positive".into()));
        }
        for feed_url in &self.feed_urls {
            let parsed = Url::parse(feed_url)
                .map_err(|e| AppError::Config(format!("invalid feed URL {}: {}", feed_url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::Config(format!("feed URL must be http(s): {}", feed_url)));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.poll_interval_minutes) * 60)
    }

    pub fn fetch_window(&self) -> Duration {
        Duration::from_secs(self.fetch_window_secs)
    }

    pub fn is_privileged(&self, subscriber: SubscriberId) -> bool {
        self.self_hosted || self.privileged_users.contains(&subscriber)
    }
}
