pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- threads table (the catalog)
CREATE TABLE IF NOT EXISTS threads (
    thread_id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    last_updated TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_threads_last_updated ON threads(last_updated DESC);

-- subscribers table
CREATE TABLE IF NOT EXISTS subscribers (
    subscriber_id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- watchlist table (subscriber <-> thread edges)
CREATE TABLE IF NOT EXISTS watchlist (
    subscriber_id INTEGER NOT NULL REFERENCES subscribers(subscriber_id) ON DELETE CASCADE,
    thread_id INTEGER NOT NULL REFERENCES threads(thread_id),
    PRIMARY KEY (subscriber_id, thread_id)
);

CREATE INDEX IF NOT EXISTS idx_watchlist_thread_id ON watchlist(thread_id);
"#;
