use thiserror::Error;

use crate::models::SubscriberId;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// Concurrent modification detected while committing catalog changes.
    #[error("store conflict: {0}")]
    StoreConflict(String),

    #[error("messaging error: {0}")]
    Messaging(String),

    #[error("metadata lookup failed: {0}")]
    Lookup(String),

    #[error("subscriber {0} not found")]
    SubscriberNotFound(SubscriberId),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
