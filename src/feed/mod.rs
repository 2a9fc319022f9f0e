mod fetcher;
mod normalizer;

pub use fetcher::{FeedDocument, FeedFetcher};
pub use normalizer::{canonical_thread_url, candidates, parse_document};
