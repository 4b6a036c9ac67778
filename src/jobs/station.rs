//! Broadcaster station statistics for channels already seen on the daily
//! ranking.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::extract::{json_integer, json_string};
use crate::crawl::{
    CrawlCursor, CrawlError, CrawlJob, CursorPlan, Scope, UnitError, UnitRows, WorkUnit,
};
use crate::models::{ChannelSnapshot, MetricValue, Service};
use crate::repository::SnapshotStore;
use crate::scrapers::{ApiError, JsonFetch};

/// Station fields and the metric each one becomes.
const STATION_METRICS: &[(&str, &str)] = &[
    ("favorites", "/station/upd/fan_cnt"),
    ("numberOfSubscribers", "/subscription/total"),
    ("cumulativeViewers", "/station/upd/total_view_cnt"),
    ("cumulativeUpCount", "/station/upd/total_ok_cnt"),
    ("cumulativeBroadcastTime", "/station/total_broad_time"),
];

const DETAIL_METRICS: &[(&str, &str)] = &[
    ("fanClub", "/count/fanclub"),
    ("supporters", "/count/supporter"),
];

/// Timestamps kept as unix seconds.
const STATION_TIMES: &[(&str, &str)] = &[
    ("creationDate", "/station/jointime"),
    ("recentBroadcastDate", "/station/broad_start"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationJobConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Service whose known channels are refreshed.
    #[serde(default = "default_service")]
    pub service: Service,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Pause between channels.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

fn default_api_base() -> String {
    "https://static.poong.today/sooplive/api".to_string()
}

fn default_service() -> Service {
    Service::PoongToday
}

fn default_batch_size() -> i64 {
    100
}

fn default_pacing_ms() -> u64 {
    500
}

impl Default for StationJobConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            service: default_service(),
            batch_size: default_batch_size(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

/// Both documents for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StationRow {
    pub channel_id: String,
    pub station: Value,
    pub detail: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct StationJob {
    id: String,
    config: StationJobConfig,
}

impl StationJob {
    pub fn new(id: &str, config: StationJobConfig) -> Self {
        Self {
            id: id.to_string(),
            config,
        }
    }

    fn url(&self, channel_id: &str, suffix: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            channel_id,
            suffix
        )
    }

    fn headers() -> [(&'static str, String); 1] {
        [("Accept", "application/json".to_string())]
    }

    async fn fetch_station<C: JsonFetch + ?Sized>(
        &self,
        api: &C,
        channel_id: &str,
    ) -> Result<StationRow, ApiError> {
        let station = api
            .get_json(&self.url(channel_id, "station"), &[], &Self::headers())
            .await?;
        let detail = match api
            .get_json(&self.url(channel_id, "station/detail"), &[], &Self::headers())
            .await
        {
            Ok(detail) => Some(detail),
            Err(e @ ApiError::RateLimited { .. }) => return Err(e),
            Err(e) => {
                debug!("{}: no station detail for {}: {}", self.id, channel_id, e);
                None
            }
        };
        Ok(StationRow {
            channel_id: channel_id.to_string(),
            station,
            detail,
        })
    }
}

fn unix_seconds(value: &Value, pointer: &str) -> Option<i64> {
    let text = json_string(value, pointer)?;
    NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|t| t.and_utc().timestamp())
}

#[async_trait]
impl<C: JsonFetch> CrawlJob<C> for StationJob {
    type Row = StationRow;

    fn id(&self) -> &str {
        &self.id
    }

    fn plan(&self) -> CursorPlan {
        CursorPlan::Keyset
    }

    async fn prepare(&self, _api: &mut C) -> Result<Vec<Scope>, CrawlError> {
        Ok(Vec::new())
    }

    async fn fetch_unit(
        &self,
        api: &mut C,
        store: &dyn SnapshotStore,
        unit: &WorkUnit,
    ) -> Result<UnitRows<StationRow>, UnitError> {
        let before = match unit.cursor {
            CrawlCursor::After(key) => key,
            _ => None,
        };
        let known = store
            .find_known(self.config.service, before, self.config.batch_size)
            .await?;
        let next_key = known.iter().map(|e| e.id).min();

        let mut rows = Vec::with_capacity(known.len());
        for entry in &known {
            match self.fetch_station(&*api, &entry.channel_id).await {
                Ok(row) => rows.push(row),
                // Throttling fails the whole batch so it is retried after backoff.
                Err(e @ ApiError::RateLimited { .. }) => return Err(e.into()),
                Err(e) => warn!("{}: station {} skipped: {}", self.id, entry.channel_id, e),
            }
            if self.config.pacing_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.pacing_ms)).await;
            }
        }

        let skipped = known.len() - rows.len();
        Ok(UnitRows::new(rows)
            .with_sponsored(skipped)
            .with_next_key(next_key))
    }

    fn map_row(&self, row: StationRow, _unit: &WorkUnit) -> Option<ChannelSnapshot> {
        // A station document without its core block is an error page.
        row.station.get("station")?;

        let mut snapshot = ChannelSnapshot::new(row.channel_id, self.config.service, None);
        for (metric, pointer) in STATION_METRICS {
            let value = json_integer(&row.station, pointer).unwrap_or(0);
            snapshot.metrics.insert(metric.to_string(), MetricValue::Int(value));
        }
        if let Some(detail) = &row.detail {
            for (metric, pointer) in DETAIL_METRICS {
                let value = json_integer(detail, pointer).unwrap_or(0);
                snapshot.metrics.insert(metric.to_string(), MetricValue::Int(value));
            }
        }
        for (metric, pointer) in STATION_TIMES {
            if let Some(ts) = unix_seconds(&row.station, pointer) {
                snapshot.metrics.insert(metric.to_string(), MetricValue::Int(ts));
            }
        }
        snapshot.display.name = json_string(&row.station, "/station/user_nick");
        Some(snapshot)
    }
}
