//! Diesel ORM records for database tables.

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};

use crate::schema;

/// Channel snapshot row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::channel_snapshots)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ChannelSnapshotRecord {
    pub id: i64,
    pub channel_id: String,
    pub service: String,
    pub snapshot_date: String,
    pub name: Option<String>,
    pub icon_url: Option<String>,
    pub category: Option<String>,
    pub tags: Option<String>,
    pub metrics: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Service crawl state row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::service_crawl_state)]
#[diesel(primary_key(job_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CrawlStateRecord {
    pub job_id: String,
    pub service: String,
    pub last_crawled_at: String,
    pub last_status: String,
    pub last_error: Option<String>,
    pub last_cursor: Option<String>,
    pub updated_at: String,
}

/// Row returned by the keyset roster queries.
#[derive(QueryableByName, Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = Text)]
    pub channel_id: String,
    #[diesel(sql_type = Text)]
    pub snapshot_date: String,
}
