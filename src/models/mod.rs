//! Data models for chanstats.

mod channel;
mod crawl_state;

pub use channel::{ChannelSnapshot, DisplayFields, MetricValue, Service, SnapshotKey};
pub use crawl_state::{CrawlStatus, ServiceCrawlState};
