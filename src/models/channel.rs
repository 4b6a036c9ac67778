//! Channel statistics snapshots.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Third-party service a snapshot was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// playboard.co YouTube rankings.
    PlayboardCo,
    /// poong.today SOOP rankings and station API.
    PoongToday,
    /// viewership.softc.one CHZZK rankings.
    Viewership,
    /// YouTube Data API.
    Youtube,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlayboardCo => "playboard_co",
            Self::PoongToday => "poong_today",
            Self::Viewership => "viewership",
            Self::Youtube => "youtube",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "playboard_co" => Some(Self::PlayboardCo),
            "poong_today" => Some(Self::PoongToday),
            "viewership" => Some(Self::Viewership),
            "youtube" => Some(Self::Youtube),
            _ => None,
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named statistic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Int(v) => *v,
            Self::Float(v) => v.floor() as i64,
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// Human-facing fields shown next to the numbers.
///
/// `None` means "not observed in this crawl"; an upsert keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Comma-joined tag list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

/// One observation of a channel's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel_id: String,
    pub service: Service,
    /// Calendar day for historical feeds; `None` for latest-only feeds.
    pub date: Option<NaiveDate>,
    pub metrics: BTreeMap<String, MetricValue>,
    #[serde(default)]
    pub display: DisplayFields,
}

impl ChannelSnapshot {
    /// Create an empty snapshot for a channel.
    pub fn new(channel_id: impl Into<String>, service: Service, date: Option<NaiveDate>) -> Self {
        Self {
            channel_id: channel_id.into(),
            service,
            date,
            metrics: BTreeMap::new(),
            display: DisplayFields::default(),
        }
    }

    /// Builder-style metric setter.
    pub fn with_metric(mut self, name: &str, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(name.to_string(), value.into());
        self
    }

    pub fn metric(&self, name: &str) -> Option<MetricValue> {
        self.metrics.get(name).copied()
    }

    /// Uniqueness key this snapshot is stored under.
    pub fn key(&self) -> SnapshotKey {
        match self.date {
            Some(date) => SnapshotKey::Daily {
                channel_id: self.channel_id.clone(),
                service: self.service,
                date,
            },
            None => SnapshotKey::Latest {
                channel_id: self.channel_id.clone(),
                service: self.service,
            },
        }
    }
}

/// Identity of a stored snapshot row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SnapshotKey {
    /// One row per channel per service.
    Latest { channel_id: String, service: Service },
    /// One row per channel per service per day.
    Daily {
        channel_id: String,
        service: Service,
        date: NaiveDate,
    },
}

impl SnapshotKey {
    pub fn channel_id(&self) -> &str {
        match self {
            Self::Latest { channel_id, .. } | Self::Daily { channel_id, .. } => channel_id,
        }
    }

    pub fn service(&self) -> Service {
        match self {
            Self::Latest { service, .. } | Self::Daily { service, .. } => *service,
        }
    }
}

impl std::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest {
                channel_id,
                service,
            } => write!(f, "{}/{}", service, channel_id),
            Self::Daily {
                channel_id,
                service,
                date,
            } => write!(f, "{}/{}@{}", service, channel_id, date),
        }
    }
}
