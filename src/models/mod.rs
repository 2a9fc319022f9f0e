mod catalog;
mod notification;

pub use catalog::{CandidateEntry, CatalogChanged, CatalogEntry, SubscriberId, ThreadId, WatchlistEdge};
pub use notification::{DeliveryAddress, Notification};
