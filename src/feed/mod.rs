//! Feed ingestion: fetching RSS sources and merging them into an article set.

pub mod aggregator;
pub mod source;

pub use aggregator::Aggregator;
pub use source::{FeedSource, HttpFeedSource, MockFeedSource};
