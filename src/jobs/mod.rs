//! Job definitions: every crawl the service knows how to run.
//!
//! A job is a [`JobDefinition`] (identity, schedule, retry policy) wrapping a
//! [`JobTemplate`] that the runner turns into a concrete [`CrawlJob`].
//!
//! [`CrawlJob`]: crate::crawl::CrawlJob

pub mod actions;
pub mod catalog;
pub mod extract;
pub mod ranking;
pub mod roster;
pub mod station;
pub mod youtube;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::crawl::{CrawlPolicy, CursorPlan, DateSpec};
use crate::models::Service;

pub use actions::PageAction;
pub use extract::{FieldRole, FieldSource, FieldSpec, IdSegment, MetricKind};
pub use ranking::{CategoryConfig, RankingJob, RankingJobConfig};
pub use roster::{RosterJob, RosterJobConfig};
pub use station::{StationJob, StationJobConfig};
pub use youtube::{YoutubeJob, YoutubeJobConfig};

/// Which snapshot key a job writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// One row per channel, overwritten every run.
    Latest,
    /// One row per channel per day.
    Daily,
}

/// Cursor configuration, resolved against the run day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorConfig {
    Once,
    Dates {
        initial: DateSpec,
        target: DateSpec,
    },
    Pages {
        #[serde(default = "default_first_page")]
        first: u32,
        #[serde(default)]
        max_rows: Option<usize>,
        #[serde(default = "default_max_pages")]
        max_pages: u32,
    },
}

fn default_first_page() -> u32 {
    1
}

fn default_max_pages() -> u32 {
    50
}

impl CursorConfig {
    pub fn plan(&self, today: NaiveDate) -> CursorPlan {
        match self {
            Self::Once => CursorPlan::Once,
            Self::Dates { initial, target } => CursorPlan::Dates {
                start: initial.resolve(today),
                end: target.resolve(today),
            },
            Self::Pages {
                first,
                max_rows,
                max_pages,
            } => CursorPlan::Pages {
                first: *first,
                max_rows: *max_rows,
                max_pages: *max_pages,
            },
        }
    }
}

/// What a job crawls and through which fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobTemplate {
    /// Browser crawl of a ranking list.
    Ranking(RankingJobConfig),
    /// Browser revisit of stored channels.
    Roster(RosterJobConfig),
    /// Video-platform data API.
    Youtube(YoutubeJobConfig),
    /// Station JSON API.
    Station(StationJobConfig),
}

impl JobTemplate {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ranking(_) => "ranking",
            Self::Roster(_) => "roster",
            Self::Youtube(_) => "youtube",
            Self::Station(_) => "station",
        }
    }
}

/// Retry and pacing knobs in config-file units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    /// Pause after every unit, in milliseconds.
    #[serde(default)]
    pub pacing_ms: u64,
}

fn default_retry_budget() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    30
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            backoff_secs: default_backoff_secs(),
            pacing_ms: 0,
        }
    }
}

impl PolicyConfig {
    pub fn pacing_secs(secs: u64) -> Self {
        Self {
            pacing_ms: secs * 1000,
            ..Self::default()
        }
    }

    pub fn to_policy(self, resume_after: Option<NaiveDate>) -> CrawlPolicy {
        CrawlPolicy {
            retry_budget: self.retry_budget,
            backoff: Duration::from_secs(self.backoff_secs),
            pacing: Duration::from_millis(self.pacing_ms),
            resume_after,
        }
    }
}

/// A named, schedulable crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: String,
    pub service: Service,
    /// Six-field cron expression, seconds first.
    pub schedule: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Start date crawls after the last completed day of the previous run.
    #[serde(default)]
    pub resume: bool,
    pub template: JobTemplate,
}

fn default_enabled() -> bool {
    true
}

/// Per-job settings a config file may change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOverride {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub target_count: Option<usize>,
    #[serde(default)]
    pub pacing_secs: Option<u64>,
    #[serde(default)]
    pub retry_budget: Option<u32>,
    #[serde(default)]
    pub initial_date: Option<DateSpec>,
    #[serde(default)]
    pub target_date: Option<DateSpec>,
}

impl JobDefinition {
    /// Layer `o` over this definition. Fields that do not apply to the
    /// job's template are ignored.
    pub fn apply(&mut self, o: &JobOverride) {
        if let Some(enabled) = o.enabled {
            self.enabled = enabled;
        }
        if let Some(schedule) = &o.schedule {
            self.schedule = schedule.clone();
        }
        if let Some(secs) = o.pacing_secs {
            self.policy.pacing_ms = secs * 1000;
        }
        if let Some(budget) = o.retry_budget {
            self.policy.retry_budget = budget;
        }

        let JobTemplate::Ranking(ranking) = &mut self.template else {
            return;
        };
        if let Some(target) = o.target_count {
            ranking.target_count = target;
        }
        if let CursorConfig::Dates { initial, target } = &mut ranking.cursor {
            if let Some(d) = o.initial_date {
                *initial = d;
            }
            if let Some(d) = o.target_date {
                *target = d;
            }
        }
    }
}
