//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM over SQLite.

pub mod context;
pub mod crawl_state;
pub mod models;
pub mod pool;
pub mod snapshot;
pub mod store;
pub mod util;

pub use context::DbContext;
pub use crawl_state::DieselCrawlStateRepository;
pub use pool::{AsyncSqlitePool, DieselError};
pub use snapshot::DieselSnapshotRepository;
pub use store::{PendingFilter, RosterEntry, SnapshotStore, StoreError};
