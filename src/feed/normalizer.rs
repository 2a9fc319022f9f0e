use std::sync::OnceLock;

use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use regex::Regex;

use crate::error::Result;
use crate::models::{CandidateEntry, ThreadId};

const THREAD_URL_BASE: &str = "https://f95zone.to/threads/";

// Matches ".../threads/<slug>.<id>/..." as well as ".../threads/<id>".
// The slug may itself contain dots, so the id is the last dot-separated run
// of digits before the path ends.
const THREAD_URL_PATTERN: &str =
    r"(?i)https?://(?:www\.)?f95zone\.to/threads/(?:[^/?#\s]*\.)?([0-9]+)(?:[/?#\s]|$)";

fn thread_regex() -> &'static Regex {
    static THREAD_REGEX: OnceLock<Regex> = OnceLock::new();
    THREAD_REGEX.get_or_init(|| Regex::new(THREAD_URL_PATTERN).expect("thread URL pattern is valid"))
}

/// Canonical thread URL and id for `raw`, with slug, page and query noise removed.
pub fn canonical_thread_url(raw: &str) -> Option<(String, ThreadId)> {
    let captures = thread_regex().captures(raw)?;
    let thread_id: ThreadId = captures.get(1)?.as_str().parse().ok()?;
    Some((format!("{}{}", THREAD_URL_BASE, thread_id), thread_id))
}

/// Decode HTML entities in a feed title. Anything else is kept verbatim.
pub fn decode_html(raw: &str) -> String {
    html_escape::decode_html_entities(raw).trim().to_string()
}

pub fn parse_document(bytes: &[u8]) -> Result<Feed> {
    Ok(parser::parse(bytes)?)
}

/// Lazily normalize every usable item of `feed`. Items that don't point at a
/// thread or carry no timestamp are skipped.
pub fn candidates(feed: &Feed) -> impl Iterator<Item = CandidateEntry> + '_ {
    feed.entries.iter().filter_map(normalize_entry)
}

fn normalize_entry(entry: &Entry) -> Option<CandidateEntry> {
    let Some((url, thread_id)) = std::iter::once(entry.id.as_str())
        .chain(entry.links.iter().map(|l| l.href.as_str()))
        .find_map(canonical_thread_url)
    else {
        tracing::trace!("Skipping feed item {}: not a thread URL", entry.id);
        return None;
    };

    let Some(last_updated) = entry.published.or(entry.updated) else {
        tracing::trace!("Skipping thread {}: no timestamp", thread_id);
        return None;
    };

    let title = entry
        .title
        .as_ref()
        .map(|t| decode_html(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    Some(CandidateEntry {
        thread_id,
        title,
        url,
        last_updated,
    })
}
