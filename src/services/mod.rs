mod discord;
mod thread_info;
mod watchlist;

pub use discord::DiscordMessenger;
pub use thread_info::{MetadataLookup, ThreadInfoProvider, ThreadMetadata};
pub use watchlist::{UnwatchReport, WatchReport, WatchlistService};
