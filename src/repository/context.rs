//! Database context for managing connections and repository access.

use std::path::Path;

use diesel_async::SimpleAsyncConnection;

use super::crawl_state::DieselCrawlStateRepository;
use super::pool::{AsyncSqlitePool, DieselError};
use super::snapshot::DieselSnapshotRepository;

/// Database context that owns the connection factory and hands out repositories.
///
/// # Example
/// ```ignore
/// let ctx = DbContext::from_url("sqlite:chanstats.db");
/// ctx.init_schema().await?;
/// let states = ctx.crawl_state().get_all().await?;
/// ```
#[derive(Clone)]
pub struct DbContext {
    pool: AsyncSqlitePool,
}

impl DbContext {
    /// Create a context from a database URL (`sqlite:path` or a plain path).
    pub fn from_url(database_url: &str) -> Self {
        Self {
            pool: AsyncSqlitePool::new(database_url),
        }
    }

    /// Create a context from a file path.
    pub fn from_sqlite_path(db_path: &Path) -> Self {
        Self {
            pool: AsyncSqlitePool::from_path(db_path),
        }
    }

    pub fn pool(&self) -> &AsyncSqlitePool {
        &self.pool
    }

    pub fn snapshots(&self) -> DieselSnapshotRepository {
        DieselSnapshotRepository::new(self.pool.clone())
    }

    pub fn crawl_state(&self) -> DieselCrawlStateRepository {
        DieselCrawlStateRepository::new(self.pool.clone())
    }

    /// Create tables if they don't exist.
    pub async fn init_schema(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(
            r#"
            PRAGMA journal_mode = WAL;

            -- One row per (channel, service, day); latest-only feeds store ''
            CREATE TABLE IF NOT EXISTS channel_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id TEXT NOT NULL,
                service TEXT NOT NULL,
                snapshot_date TEXT NOT NULL DEFAULT '',
                name TEXT,
                icon_url TEXT,
                category TEXT,
                tags TEXT,
                metrics TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(channel_id, service, snapshot_date)
            );

            CREATE INDEX IF NOT EXISTS idx_channel_snapshots_service_date
                ON channel_snapshots(service, snapshot_date);

            CREATE TABLE IF NOT EXISTS service_crawl_state (
                job_id TEXT PRIMARY KEY,
                service TEXT NOT NULL,
                last_crawled_at TEXT NOT NULL,
                last_status TEXT NOT NULL,
                last_error TEXT,
                last_cursor TEXT,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .await
    }
}
