//! Per-job crawl bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Service;

/// Outcome of the most recent run of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Running,
    Completed,
    /// Finished, but some work units failed terminally.
    Partial,
    Failed,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Last-run record for a job.
///
/// `last_crawled_at` is stamped when a run starts, whatever its outcome.
/// `last_cursor` is a resume hint for date-ranged crawls only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCrawlState {
    pub job_id: String,
    pub service: Service,
    pub last_crawled_at: DateTime<Utc>,
    pub last_status: CrawlStatus,
    pub last_error: Option<String>,
    pub last_cursor: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceCrawlState {
    /// State recorded at the start of a run.
    pub fn started(job_id: &str, service: Service) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.to_string(),
            service,
            last_crawled_at: now,
            last_status: CrawlStatus::Running,
            last_error: None,
            last_cursor: None,
            updated_at: now,
        }
    }
}
