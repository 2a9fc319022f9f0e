use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{CatalogEntry, SubscriberId, ThreadId, WatchlistEdge};

use super::schema::SCHEMA;

/// Upper bound on bound parameters per `IN (...)` query.
const MAX_IN_PARAMS: usize = 500;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A freshness update: the new values plus the timestamp that was read
/// before the update was decided, used to detect concurrent writers.
#[derive(Debug, Clone)]
pub struct ThreadUpdate {
    pub entry: CatalogEntry,
    pub previous_updated: DateTime<Utc>,
}

/// Inserts and updates committed together in one transaction.
#[derive(Debug, Clone, Default)]
pub struct CatalogChanges {
    pub inserts: Vec<CatalogEntry>,
    pub updates: Vec<ThreadUpdate>,
}

impl CatalogChanges {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }

    fn into_entries(self) -> Vec<CatalogEntry> {
        self.inserts
            .into_iter()
            .chain(self.updates.into_iter().map(|u| u.entry))
            .collect()
    }
}

enum CommitError {
    Conflict(String),
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for CommitError {
    fn from(e: rusqlite::Error) -> Self {
        if is_conflict(&e) {
            CommitError::Conflict(e.to_string())
        } else {
            CommitError::Sqlite(e)
        }
    }
}

fn is_conflict(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::ConstraintViolation
            )
    )
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Catalog operations

    pub async fn get_thread(&self, thread_id: ThreadId) -> Result<Option<CatalogEntry>> {
        let entry = self
            .conn
            .call(move |conn| {
                let entry = conn
                    .query_row(
                        "SELECT thread_id, title, url, last_updated FROM threads WHERE thread_id = ?1",
                        params![to_sql_id(thread_id)],
                        thread_from_row,
                    )
                    .optional()?;
                Ok(entry)
            })
            .await?;
        Ok(entry)
    }

    /// Range scan of the catalog restricted to `ids`.
    pub async fn threads_by_ids(&self, ids: Vec<ThreadId>) -> Result<Vec<CatalogEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let threads = self
            .conn
            .call(move |conn| {
                let mut threads = Vec::with_capacity(ids.len());
                for chunk in ids.chunks(MAX_IN_PARAMS) {
                    let sql = format!(
                        "SELECT thread_id, title, url, last_updated FROM threads WHERE thread_id IN ({})",
                        placeholders(chunk.len())
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(params_from_iter(chunk.iter().map(|id| to_sql_id(*id))), thread_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    threads.extend(rows);
                }
                Ok(threads)
            })
            .await?;
        Ok(threads)
    }

    /// Commits all inserts and updates atomically and returns the changed entries.
    ///
    /// Each update only applies if the row still carries `previous_updated`;
    /// otherwise, or when the database is busy or a concurrent insert won,
    /// the whole transaction is rolled back with [`AppError::StoreConflict`].
    pub async fn apply_changes(&self, changes: CatalogChanges) -> Result<Vec<CatalogEntry>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        let outcome = self
            .conn
            .call(move |conn| {
                let outcome = commit_changes(conn, &changes).map(|_| changes.into_entries());
                Ok(outcome)
            })
            .await?;

        match outcome {
            Ok(changed) => Ok(changed),
            Err(CommitError::Conflict(reason)) => Err(AppError::StoreConflict(reason)),
            Err(CommitError::Sqlite(e)) => Err(e.into()),
        }
    }

    /// Inserts `entry` unless the thread is already known; returns the stored row.
    pub async fn insert_thread_if_absent(&self, entry: CatalogEntry) -> Result<CatalogEntry> {
        let stored = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO threads (thread_id, title, url, last_updated) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        to_sql_id(entry.thread_id),
                        entry.title,
                        entry.url,
                        entry.last_updated.to_rfc3339()
                    ],
                )?;
                let stored = conn.query_row(
                    "SELECT thread_id, title, url, last_updated FROM threads WHERE thread_id = ?1",
                    params![to_sql_id(entry.thread_id)],
                    thread_from_row,
                )?;
                Ok(stored)
            })
            .await?;
        Ok(stored)
    }

    // Watchlist reads

    /// All watchlist edges pointing at any of `ids`.
    pub async fn watchers_of(&self, ids: Vec<ThreadId>) -> Result<Vec<WatchlistEdge>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let edges = self
            .conn
            .call(move |conn| {
                let mut edges = Vec::new();
                for chunk in ids.chunks(MAX_IN_PARAMS) {
                    let sql = format!(
                        "SELECT subscriber_id, thread_id FROM watchlist WHERE thread_id IN ({})",
                        placeholders(chunk.len())
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(params_from_iter(chunk.iter().map(|id| to_sql_id(*id))), |row| {
                            Ok(WatchlistEdge {
                                subscriber_id: from_sql_id(row.get(0)?),
                                thread_id: from_sql_id(row.get(1)?),
                            })
                        })?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    edges.extend(rows);
                }
                Ok(edges)
            })
            .await?;
        Ok(edges)
    }

    pub async fn watchlist(&self, subscriber: SubscriberId) -> Result<Vec<CatalogEntry>> {
        let threads = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT t.thread_id, t.title, t.url, t.last_updated
                       FROM watchlist w
                       JOIN threads t ON w.thread_id = t.thread_id
                       WHERE w.subscriber_id = ?1
                       ORDER BY t.last_updated DESC, t.thread_id"#,
                )?;
                let threads = stmt
                    .query_map(params![to_sql_id(subscriber)], thread_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(threads)
            })
            .await?;
        Ok(threads)
    }

    // Watchlist writes

    /// Returns `false` when the edge already existed.
    pub async fn add_watch(&self, subscriber: SubscriberId, thread_id: ThreadId) -> Result<bool> {
        let inserted = self
            .conn
            .call(move |conn| {
                let rows = conn.execute(
                    "INSERT OR IGNORE INTO watchlist (subscriber_id, thread_id) VALUES (?1, ?2)",
                    params![to_sql_id(subscriber), to_sql_id(thread_id)],
                )?;
                Ok(rows > 0)
            })
            .await?;
        Ok(inserted)
    }

    /// Returns `false` when there was no such edge.
    pub async fn remove_watch(&self, subscriber: SubscriberId, thread_id: ThreadId) -> Result<bool> {
        let removed = self
            .conn
            .call(move |conn| {
                let rows = conn.execute(
                    "DELETE FROM watchlist WHERE subscriber_id = ?1 AND thread_id = ?2",
                    params![to_sql_id(subscriber), to_sql_id(thread_id)],
                )?;
                Ok(rows > 0)
            })
            .await?;
        Ok(removed)
    }

    // Subscriber operations

    pub async fn subscriber_exists(&self, subscriber: SubscriberId) -> Result<bool> {
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM subscribers WHERE subscriber_id = ?1",
                    params![to_sql_id(subscriber)],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    /// Returns `false` when the subscriber was already registered.
    pub async fn add_subscriber(&self, subscriber: SubscriberId) -> Result<bool> {
        let inserted = self
            .conn
            .call(move |conn| {
                let rows = conn.execute(
                    "INSERT OR IGNORE INTO subscribers (subscriber_id) VALUES (?1)",
                    params![to_sql_id(subscriber)],
                )?;
                Ok(rows > 0)
            })
            .await?;
        Ok(inserted)
    }

    /// Deletes the subscriber; its watchlist edges go with it.
    pub async fn remove_subscriber(&self, subscriber: SubscriberId) -> Result<bool> {
        let removed = self
            .conn
            .call(move |conn| {
                let rows = conn.execute(
                    "DELETE FROM subscribers WHERE subscriber_id = ?1",
                    params![to_sql_id(subscriber)],
                )?;
                Ok(rows > 0)
            })
            .await?;
        Ok(removed)
    }
}

fn commit_changes(
    conn: &mut rusqlite::Connection,
    changes: &CatalogChanges,
) -> std::result::Result<(), CommitError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    {
        let mut insert = tx.prepare(
            "INSERT INTO threads (thread_id, title, url, last_updated) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for entry in &changes.inserts {
            insert.execute(params![
                to_sql_id(entry.thread_id),
                entry.title,
                entry.url,
                entry.last_updated.to_rfc3339()
            ])?;
        }

        let mut update = tx.prepare(
            "UPDATE threads SET title = ?1, last_updated = ?2 WHERE thread_id = ?3 AND last_updated = ?4",
        )?;
        for change in &changes.updates {
            let rows = update.execute(params![
                change.entry.title,
                change.entry.last_updated.to_rfc3339(),
                to_sql_id(change.entry.thread_id),
                change.previous_updated.to_rfc3339()
            ])?;
            if rows == 0 {
                // Dropping `tx` rolls everything back.
                return Err(CommitError::Conflict(format!(
                    "thread {} was modified concurrently",
                    change.entry.thread_id
                )));
            }
        }
    }
    tx.commit()?;
    Ok(())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// Thread and subscriber ids are snowflake-style u64 values below i64::MAX.
fn to_sql_id(id: u64) -> i64 {
    id as i64
}

fn from_sql_id(id: i64) -> u64 {
    id as u64
}

// Timestamps are only ever written with `to_rfc3339`, which the update guard
// compares against verbatim.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn thread_from_row(row: &Row) -> rusqlite::Result<CatalogEntry> {
    let raw: String = row.get(3)?;
    let last_updated = parse_datetime(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("invalid timestamp: {raw}").into(),
        )
    })?;

    Ok(CatalogEntry {
        thread_id: from_sql_id(row.get(0)?),
        title: row.get(1)?,
        url: row.get(2)?,
        last_updated,
    })
}
