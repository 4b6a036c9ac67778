//! Roster crawls: revisit channels already in the store to fill one metric.
//!
//! Each work unit is a single channel, so every value read is upserted before
//! the next detail page is opened.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::extract::MetricKind;
use crate::crawl::{
    CrawlCursor, CrawlError, CrawlJob, CursorPlan, Scope, UnitError, UnitRows, WorkUnit,
};
use crate::models::{ChannelSnapshot, Service};
use crate::repository::{PendingFilter, RosterEntry, SnapshotStore};
use crate::scrapers::{CookieSpec, DriverError, PageDriver, SessionOptions, WaitPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterJobConfig {
    pub service: Service,
    /// Detail page; `{id}` is replaced with the channel id.
    pub url_template: String,
    pub selector: String,
    /// Metric to fill. Rows already holding it are not revisited.
    pub metric: String,
    #[serde(default = "default_kind")]
    pub kind: MetricKind,
    #[serde(default = "default_lookup_attempts")]
    pub lookup_attempts: u32,
    #[serde(default = "default_lookup_delay_ms")]
    pub lookup_delay_ms: u64,
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub cookies: Vec<CookieSpec>,
}

fn default_kind() -> MetricKind {
    MetricKind::Integer
}

fn default_lookup_attempts() -> u32 {
    3
}

fn default_lookup_delay_ms() -> u64 {
    2000
}

fn default_wait_secs() -> u64 {
    10
}

impl RosterJobConfig {
    pub fn session(&self) -> SessionOptions {
        SessionOptions {
            user_agent: self.user_agent.clone(),
            cookies: self.cookies.clone(),
        }
    }

    fn url_for(&self, channel_id: &str) -> String {
        self.url_template.replace("{id}", channel_id)
    }
}

/// A stored row and the value read from its detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    pub entry: RosterEntry,
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RosterJob {
    id: String,
    config: RosterJobConfig,
}

impl RosterJob {
    pub fn new(id: &str, config: RosterJobConfig) -> Self {
        Self {
            id: id.to_string(),
            config,
        }
    }

    pub fn config(&self) -> &RosterJobConfig {
        &self.config
    }

    fn filter(&self) -> PendingFilter {
        PendingFilter {
            service: self.config.service,
            missing_metric: self.config.metric.clone(),
        }
    }

    async fn read_once<D: PageDriver + ?Sized>(
        &self,
        driver: &mut D,
        url: &str,
    ) -> Result<Option<String>, DriverError> {
        let outcome = driver.navigate(url, WaitPolicy::DomReady).await?;
        if let Some(status) = outcome.status.filter(|s| *s >= 400) {
            return Err(DriverError::Blocked {
                url: url.to_string(),
                status,
            });
        }
        driver
            .wait_for(&self.config.selector, Duration::from_secs(self.config.wait_secs))
            .await?;
        match driver.query_first(&self.config.selector).await? {
            Some(el) => driver.text(&el).await,
            None => Ok(None),
        }
    }

    /// Read the metric for one channel, retrying a few times before giving up.
    async fn lookup<D: PageDriver + ?Sized>(
        &self,
        driver: &mut D,
        channel_id: &str,
    ) -> Result<Option<String>, UnitError> {
        let url = self.config.url_for(channel_id);
        let attempts = self.config.lookup_attempts.max(1);

        for attempt in 1..=attempts {
            match self.read_once(driver, &url).await {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => debug!("{}: {} has no value yet", self.id, channel_id),
                Err(e @ (DriverError::Closed | DriverError::Unavailable(_))) => {
                    return Err(e.into())
                }
                Err(e) => debug!(
                    "{}: {} attempt {}/{} failed: {}",
                    self.id, channel_id, attempt, attempts, e
                ),
            }
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(self.config.lookup_delay_ms)).await;
            }
        }

        warn!(
            "{}: no {} for {} after {} attempts",
            self.id, self.config.metric, channel_id, attempts
        );
        Ok(None)
    }
}

#[async_trait]
impl<D: PageDriver> CrawlJob<D> for RosterJob {
    type Row = RosterRow;

    fn id(&self) -> &str {
        &self.id
    }

    fn plan(&self) -> CursorPlan {
        CursorPlan::Keyset
    }

    async fn prepare(&self, _driver: &mut D) -> Result<Vec<Scope>, CrawlError> {
        Ok(Vec::new())
    }

    async fn fetch_unit(
        &self,
        driver: &mut D,
        store: &dyn SnapshotStore,
        unit: &WorkUnit,
    ) -> Result<UnitRows<RosterRow>, UnitError> {
        let before = match unit.cursor {
            CrawlCursor::After(key) => key,
            _ => None,
        };
        let Some(entry) = store
            .find_pending(&self.filter(), before, 1)
            .await?
            .into_iter()
            .next()
        else {
            debug!("{}: nothing pending after {}", self.id, unit);
            return Ok(UnitRows::new(Vec::new()));
        };
        let next_key = Some(entry.id);

        let value = self.lookup(driver, &entry.channel_id).await?;
        Ok(UnitRows::new(vec![RosterRow { entry, value }]).with_next_key(next_key))
    }

    fn map_row(&self, row: RosterRow, _unit: &WorkUnit) -> Option<ChannelSnapshot> {
        let value = row.value?;
        Some(
            ChannelSnapshot::new(row.entry.channel_id, self.config.service, row.entry.date)
                .with_metric(&self.config.metric, self.config.kind.parse(Some(&value))),
        )
    }
}
