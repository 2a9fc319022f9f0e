use std::collections::HashMap;

use crate::models::{CatalogEntry, Notification, SubscriberId, ThreadId, WatchlistEdge};

/// Map every subscriber to the changed entries they watch.
pub fn group_by_subscriber<'a>(
    changed: &'a [CatalogEntry],
    edges: &[WatchlistEdge],
) -> HashMap<SubscriberId, Vec<&'a CatalogEntry>> {
    let by_id: HashMap<ThreadId, &CatalogEntry> =
        changed.iter().map(|e| (e.thread_id, e)).collect();

    let mut grouped: HashMap<SubscriberId, Vec<&CatalogEntry>> = HashMap::new();
    for edge in edges {
        if let Some(entry) = by_id.get(&edge.thread_id) {
            grouped.entry(edge.subscriber_id).or_default().push(entry);
        }
    }

    for entries in grouped.values_mut() {
        entries.sort_by_key(|e| e.thread_id);
        entries.dedup_by_key(|e| e.thread_id);
    }
    grouped
}

pub fn notification_body(entries: &[&CatalogEntry]) -> String {
    entries
        .iter()
        .map(|e| e.url.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// One notification per subscriber listing every changed thread they watch.
pub fn build_notifications(changed: &[CatalogEntry], edges: &[WatchlistEdge]) -> Vec<Notification> {
    group_by_subscriber(changed, edges)
        .into_iter()
        .map(|(subscriber_id, entries)| Notification {
            subscriber_id,
            body: notification_body(&entries),
        })
        .collect()
}
