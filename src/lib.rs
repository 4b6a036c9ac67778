//! chanstats - scheduled channel-statistics crawler.
//!
//! Collects per-channel, per-day statistics from ranking websites (through a
//! headless browser) and from JSON APIs, and upserts them into SQLite so
//! repeated or resumed runs never duplicate history.

pub mod cli;
pub mod config;
pub mod crawl;
pub mod jobs;
pub mod models;
pub mod normalize;
pub mod repository;
pub mod runner;
pub mod scheduler;
pub mod schema;
pub mod scrapers;
pub mod server;
