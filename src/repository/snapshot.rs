//! Diesel-based channel snapshot repository for SQLite.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel_async::RunQueryDsl;

use super::models::{ChannelSnapshotRecord, RosterRow};
use super::pool::{AsyncSqlitePool, DieselError};
use super::store::{PendingFilter, RosterEntry, SnapshotStore, StoreError};
use super::util::{date_column, parse_date_column};
use crate::models::{ChannelSnapshot, DisplayFields, MetricValue, Service, SnapshotKey};
use crate::schema::channel_snapshots;

/// Insert-or-merge keyed on (channel_id, service, snapshot_date).
const UPSERT_SQL: &str = r#"
INSERT INTO channel_snapshots
    (channel_id, service, snapshot_date, name, icon_url, category, tags, metrics, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(channel_id, service, snapshot_date) DO UPDATE SET
    name = COALESCE(NULLIF(excluded.name, ''), channel_snapshots.name),
    icon_url = COALESCE(NULLIF(excluded.icon_url, ''), channel_snapshots.icon_url),
    category = COALESCE(NULLIF(excluded.category, ''), channel_snapshots.category),
    tags = COALESCE(NULLIF(excluded.tags, ''), channel_snapshots.tags),
    metrics = json_patch(channel_snapshots.metrics, excluded.metrics),
    updated_at = excluded.updated_at
"#;

const FIND_PENDING_SQL: &str = r#"
SELECT id, channel_id, snapshot_date FROM channel_snapshots
WHERE service = ?
  AND snapshot_date <> ''
  AND json_extract(metrics, ?) IS NULL
  AND id < ?
ORDER BY id DESC
LIMIT ?
"#;

const FIND_KNOWN_SQL: &str = r#"
SELECT MAX(id) AS id, channel_id, '' AS snapshot_date FROM channel_snapshots
WHERE service = ?
GROUP BY channel_id
HAVING MAX(id) < ?
ORDER BY id DESC
LIMIT ?
"#;

impl TryFrom<ChannelSnapshotRecord> for ChannelSnapshot {
    type Error = StoreError;

    fn try_from(record: ChannelSnapshotRecord) -> Result<Self, Self::Error> {
        let service = Service::from_str(&record.service)
            .ok_or_else(|| StoreError::Invalid(format!("unknown service {}", record.service)))?;
        let metrics: BTreeMap<String, MetricValue> =
            serde_json::from_str(&record.metrics).unwrap_or_default();

        Ok(ChannelSnapshot {
            channel_id: record.channel_id,
            service,
            date: parse_date_column(&record.snapshot_date),
            metrics,
            display: DisplayFields {
                name: record.name,
                icon_url: record.icon_url,
                category: record.category,
                tags: record.tags,
            },
        })
    }
}

impl From<RosterRow> for RosterEntry {
    fn from(row: RosterRow) -> Self {
        RosterEntry {
            id: row.id,
            channel_id: row.channel_id,
            date: parse_date_column(&row.snapshot_date),
        }
    }
}

/// Serialize metrics, dropping values JSON cannot carry.
fn metrics_json(metrics: &BTreeMap<String, MetricValue>) -> String {
    let finite: BTreeMap<&String, &MetricValue> = metrics
        .iter()
        .filter(|(_, v)| match v {
            MetricValue::Float(f) => f.is_finite(),
            MetricValue::Int(_) => true,
        })
        .collect();
    serde_json::to_string(&finite).unwrap_or_else(|_| "{}".to_string())
}

/// Diesel-based snapshot repository.
#[derive(Clone)]
pub struct DieselSnapshotRepository {
    pool: AsyncSqlitePool,
}

impl DieselSnapshotRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch the row stored under `key`.
    pub async fn get(&self, key: &SnapshotKey) -> Result<Option<ChannelSnapshot>, StoreError> {
        let mut conn = self.pool.get().await?;

        let date = match key {
            SnapshotKey::Daily { date, .. } => date_column(Some(*date)),
            SnapshotKey::Latest { .. } => String::new(),
        };

        let record = channel_snapshots::table
            .filter(channel_snapshots::channel_id.eq(key.channel_id()))
            .filter(channel_snapshots::service.eq(key.service().as_str()))
            .filter(channel_snapshots::snapshot_date.eq(&date))
            .first::<ChannelSnapshotRecord>(&mut conn)
            .await
            .optional()?;

        record.map(ChannelSnapshot::try_from).transpose()
    }

    /// Most recently updated rows of a service, optionally for one day.
    pub async fn list(
        &self,
        service: Service,
        date: Option<NaiveDate>,
        limit: i64,
    ) -> Result<Vec<ChannelSnapshot>, StoreError> {
        let mut conn = self.pool.get().await?;

        let mut query = channel_snapshots::table
            .filter(channel_snapshots::service.eq(service.as_str()))
            .into_boxed();
        if let Some(date) = date {
            query = query.filter(channel_snapshots::snapshot_date.eq(date_column(Some(date))));
        }

        let records = query
            .order(channel_snapshots::updated_at.desc())
            .limit(limit)
            .load::<ChannelSnapshotRecord>(&mut conn)
            .await?;

        records.into_iter().map(ChannelSnapshot::try_from).collect()
    }

    /// Total stored rows.
    pub async fn count(&self) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        channel_snapshots::table
            .select(count_star())
            .first(&mut conn)
            .await
    }

    /// Row counts per service.
    pub async fn count_by_service(&self) -> Result<Vec<(String, i64)>, DieselError> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        channel_snapshots::table
            .group_by(channel_snapshots::service)
            .select((channel_snapshots::service, count_star()))
            .order(channel_snapshots::service.asc())
            .load(&mut conn)
            .await
    }
}

#[async_trait]
impl SnapshotStore for DieselSnapshotRepository {
    async fn upsert(&self, snapshot: &ChannelSnapshot) -> Result<(), StoreError> {
        if snapshot.channel_id.trim().is_empty() {
            return Err(StoreError::Invalid("empty channel id".to_string()));
        }

        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        diesel::sql_query(UPSERT_SQL)
            .bind::<Text, _>(snapshot.channel_id.clone())
            .bind::<Text, _>(snapshot.service.as_str().to_string())
            .bind::<Text, _>(date_column(snapshot.date))
            .bind::<Nullable<Text>, _>(snapshot.display.name.clone())
            .bind::<Nullable<Text>, _>(snapshot.display.icon_url.clone())
            .bind::<Nullable<Text>, _>(snapshot.display.category.clone())
            .bind::<Nullable<Text>, _>(snapshot.display.tags.clone())
            .bind::<Text, _>(metrics_json(&snapshot.metrics))
            .bind::<Text, _>(now.clone())
            .bind::<Text, _>(now)
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn find_pending(
        &self,
        filter: &PendingFilter,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<RosterEntry>, StoreError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<RosterRow> = diesel::sql_query(FIND_PENDING_SQL)
            .bind::<Text, _>(filter.service.as_str().to_string())
            .bind::<Text, _>(format!("$.\"{}\"", filter.missing_metric))
            .bind::<BigInt, _>(before_id.unwrap_or(i64::MAX))
            .bind::<BigInt, _>(limit)
            .load(&mut conn)
            .await?;

        Ok(rows.into_iter().map(RosterEntry::from).collect())
    }

    async fn find_known(
        &self,
        service: Service,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<RosterEntry>, StoreError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<RosterRow> = diesel::sql_query(FIND_KNOWN_SQL)
            .bind::<Text, _>(service.as_str().to_string())
            .bind::<BigInt, _>(before_id.unwrap_or(i64::MAX))
            .bind::<BigInt, _>(limit)
            .load(&mut conn)
            .await?;

        Ok(rows.into_iter().map(RosterEntry::from).collect())
    }
}
