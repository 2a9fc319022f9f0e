mod fanout;
mod monitor;
mod reconciler;

pub use monitor::{FeedMonitor, PassSummary};
pub use reconciler::CatalogReconciler;
