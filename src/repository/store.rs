//! Persistence gateway used by the crawl engine.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use super::pool::DieselError;
use crate::models::{ChannelSnapshot, Service};

/// Errors surfaced by a snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DieselError),

    #[error("invalid snapshot: {0}")]
    Invalid(String),
}

/// Selects stored daily rows that still lack a metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFilter {
    pub service: Service,
    pub missing_metric: String,
}

/// A stored row handed back to roster-style jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Database id, used as the keyset cursor.
    pub id: i64,
    pub channel_id: String,
    pub date: Option<NaiveDate>,
}

/// Idempotent snapshot storage.
///
/// `upsert` is keyed by [`ChannelSnapshot::key`]: writing the same key twice
/// leaves one row holding the later values. Metrics are merged by name and
/// display fields absent from the new snapshot keep their stored values.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn upsert(&self, snapshot: &ChannelSnapshot) -> Result<(), StoreError>;

    /// Rows matching `filter` with id below `before_id`, newest first.
    async fn find_pending(
        &self,
        filter: &PendingFilter,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<RosterEntry>, StoreError>;

    /// Distinct channels seen for `service`, newest first, below `before_id`.
    async fn find_known(
        &self,
        service: Service,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<RosterEntry>, StoreError>;
}
