//! Ranking-list crawls: one browser page of rows per work unit.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::actions::{missing_env, run_actions, PageAction};
use super::extract::{build_snapshot, extract_row, FieldSpec, RawRow};
use super::{CursorConfig, KeyMode};
use crate::crawl::{
    materialize_rows, CrawlError, CrawlJob, CursorParam, CursorPlan, DateSpec, LoadOptions,
    RowQuery, Scope, UnitError, UnitRows, WorkUnit,
};
use crate::models::{ChannelSnapshot, Service};
use crate::repository::SnapshotStore;
use crate::scrapers::{CookieSpec, NavigationOutcome, PageDriver, SessionOptions, WaitPolicy};

/// Where ranking categories are listed on the base page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub selector: String,
    /// Child holding the label; the item itself when absent.
    #[serde(default)]
    pub label_selector: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Everything that distinguishes one ranking site from another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingJobConfig {
    pub service: Service,
    pub url: String,
    /// Run before the crawl; skipped when a credential variable is unset.
    #[serde(default)]
    pub login: Vec<PageAction>,
    /// Run after every navigation to the base page.
    #[serde(default)]
    pub setup: Vec<PageAction>,
    #[serde(default)]
    pub categories: Option<CategoryConfig>,
    pub cursor: CursorConfig,
    #[serde(default)]
    pub cursor_param: Option<CursorParam>,
    /// Container that must exist once the list has rendered.
    pub list_selector: String,
    pub rows: RowQuery,
    /// Rows to count while loading, when different from `rows`.
    #[serde(default)]
    pub count_rows: Option<RowQuery>,
    #[serde(default)]
    pub load_trigger: Option<String>,
    pub target_count: usize,
    #[serde(default = "default_load_attempts")]
    pub max_load_attempts: u32,
    pub fields: Vec<FieldSpec>,
    pub key: KeyMode,
    /// Date written for daily rows when the cursor is not a date.
    #[serde(default = "default_row_date")]
    pub row_date: DateSpec,
    /// Pause after a cursor navigation before reading the page.
    #[serde(default)]
    pub settle_ms: u64,
    /// Extra wait when the list is missing, e.g. behind a challenge page.
    #[serde(default)]
    pub challenge_wait_secs: Option<u64>,
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub cookies: Vec<CookieSpec>,
}

fn default_load_attempts() -> u32 {
    50
}

fn default_row_date() -> DateSpec {
    DateSpec::Today
}

fn default_wait_secs() -> u64 {
    20
}

impl RankingJobConfig {
    pub fn session(&self) -> SessionOptions {
        SessionOptions {
            user_agent: self.user_agent.clone(),
            cookies: self.cookies.clone(),
        }
    }
}

/// A ranking crawl bound to the day it runs on.
#[derive(Debug, Clone)]
pub struct RankingJob {
    id: String,
    config: RankingJobConfig,
    today: NaiveDate,
    load: LoadOptions,
}

impl RankingJob {
    pub fn new(id: &str, config: RankingJobConfig, today: NaiveDate) -> Self {
        Self {
            id: id.to_string(),
            config,
            today,
            load: LoadOptions::default(),
        }
    }

    pub fn with_load_options(mut self, load: LoadOptions) -> Self {
        self.load = load;
        self
    }

    pub fn config(&self) -> &RankingJobConfig {
        &self.config
    }

    fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.config.wait_secs)
    }

    async fn open<D: PageDriver + ?Sized>(
        &self,
        driver: &mut D,
        url: &str,
    ) -> Result<NavigationOutcome, UnitError> {
        let outcome = driver.navigate(url, WaitPolicy::NetworkIdle).await?;
        match outcome.status {
            Some(status @ (403 | 429 | 503)) => Err(UnitError::RateLimited(format!(
                "HTTP {} at {}",
                status, url
            ))),
            Some(status) if status >= 400 => Err(UnitError::Fatal(format!(
                "HTTP {} at {}",
                status, url
            ))),
            _ => Ok(outcome),
        }
    }

    /// Navigate to the base page and re-apply the page setup.
    async fn open_base<D: PageDriver + ?Sized>(&self, driver: &mut D) -> Result<(), UnitError> {
        self.open(driver, &self.config.url).await?;
        run_actions(driver, &self.config.setup).await?;
        Ok(())
    }

    /// Wait for the list, giving a challenge page time to clear.
    async fn await_list<D: PageDriver + ?Sized>(&self, driver: &mut D) -> Result<(), UnitError> {
        let selector = &self.config.list_selector;
        match driver.wait_for(selector, self.wait_timeout()).await {
            Ok(()) => Ok(()),
            Err(first) => {
                let Some(secs) = self.config.challenge_wait_secs else {
                    return Err(first.into());
                };
                info!("{}: list missing, waiting {}s for challenge", self.id, secs);
                tokio::time::sleep(Duration::from_secs(secs)).await;
                driver
                    .wait_for(selector, self.wait_timeout())
                    .await
                    .map_err(|_| UnitError::RateLimited(format!("{} never rendered", selector)))
            }
        }
    }

    async fn select_scope<D: PageDriver + ?Sized>(
        &self,
        driver: &mut D,
        scope: &Scope,
    ) -> Result<(), UnitError> {
        let Some(categories) = &self.config.categories else {
            return Ok(());
        };
        let items = driver.query_all(&categories.selector).await?;
        let item = items.get(scope.index).ok_or_else(|| {
            UnitError::EmptyList(format!("category {} ({}) not listed", scope.name, scope.index))
        })?;
        driver.click(item).await?;
        Ok(())
    }

    fn row_date(&self, unit: &WorkUnit) -> Option<NaiveDate> {
        match self.config.key {
            KeyMode::Latest => None,
            KeyMode::Daily => Some(
                unit.date()
                    .unwrap_or_else(|| self.config.row_date.resolve(self.today)),
            ),
        }
    }
}

#[async_trait]
impl<D: PageDriver> CrawlJob<D> for RankingJob {
    type Row = RawRow;

    fn id(&self) -> &str {
        &self.id
    }

    fn plan(&self) -> CursorPlan {
        self.config.cursor.plan(self.today)
    }

    async fn prepare(&self, driver: &mut D) -> Result<Vec<Scope>, CrawlError> {
        if !self.config.login.is_empty() {
            let missing = missing_env(&self.config.login);
            if missing.is_empty() {
                info!("{}: logging in", self.id);
                run_actions(driver, &self.config.login)
                    .await
                    .map_err(|e| CrawlError::setup(format!("login failed: {}", e)))?;
            } else {
                warn!(
                    "{}: skipping login, {} not set",
                    self.id,
                    missing.join(", ")
                );
            }
        }

        let Some(categories) = &self.config.categories else {
            return Ok(Vec::new());
        };

        self.open_base(driver)
            .await
            .map_err(|e| CrawlError::setup(format!("opening {}: {}", self.config.url, e)))?;

        let items = driver
            .query_all(&categories.selector)
            .await
            .map_err(CrawlError::setup)?;
        let limit = categories.limit.unwrap_or(usize::MAX);

        let mut scopes = Vec::new();
        for (index, item) in items.iter().take(limit).enumerate() {
            let label = match &categories.label_selector {
                Some(sel) => match driver.query_within(item, sel).await {
                    Ok(Some(el)) => driver.text(&el).await.ok().flatten(),
                    _ => None,
                },
                None => driver.text(item).await.ok().flatten(),
            };
            let name = label.unwrap_or_else(|| format!("category {}", index + 1));
            scopes.push(Scope::new(name, index));
        }

        if scopes.is_empty() {
            return Err(CrawlError::setup(format!(
                "no categories matched {}",
                categories.selector
            )));
        }
        Ok(scopes)
    }

    async fn fetch_unit(
        &self,
        driver: &mut D,
        _store: &dyn SnapshotStore,
        unit: &WorkUnit,
    ) -> Result<UnitRows<RawRow>, UnitError> {
        self.open_base(driver).await?;
        if let Some(scope) = &unit.scope {
            self.select_scope(driver, scope).await?;
        }

        if let Some(param) = &self.config.cursor_param {
            let current = driver.current_url().await?;
            if !param.is_encoded_in(&current, &unit.cursor) {
                let target = param.apply(&current, &unit.cursor);
                debug!("{}: navigating to {}", self.id, target);
                self.open(driver, &target).await?;
                if self.config.settle_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
                }
            }
        }
        self.await_list(driver).await?;

        let count_rows = self.config.count_rows.as_ref().unwrap_or(&self.config.rows);
        let loaded = materialize_rows(
            driver,
            self.config.load_trigger.as_deref(),
            count_rows,
            self.config.target_count,
            self.config.max_load_attempts,
            &self.load,
        )
        .await;
        debug!("{}: {} rows loaded for {}", self.id, loaded, unit);

        let elements = driver.query_all(&self.config.rows.row_selector).await?;
        let mut rows = Vec::with_capacity(elements.len());
        let mut sponsored = 0;
        for element in &elements {
            if let Some(marker) = &self.config.rows.exclude_marker {
                if driver.query_within(element, marker).await?.is_some() {
                    sponsored += 1;
                    continue;
                }
            }
            rows.push(extract_row(driver, element, &self.config.fields).await?);
        }

        let paged = matches!(self.config.cursor, CursorConfig::Pages { .. });
        if rows.is_empty() && sponsored == 0 && !paged {
            return Err(UnitError::EmptyList(format!(
                "{} at {}",
                self.config.rows.row_selector, unit
            )));
        }

        Ok(UnitRows::new(rows).with_sponsored(sponsored))
    }

    async fn recover(&self, driver: &mut D, _unit: &WorkUnit) -> Result<(), UnitError> {
        self.open(driver, &self.config.url).await.map(|_| ())
    }

    fn map_row(&self, row: RawRow, unit: &WorkUnit) -> Option<ChannelSnapshot> {
        build_snapshot(
            &self.config.fields,
            &row,
            self.config.service,
            self.row_date(unit),
            unit.scope.as_ref().map(|s| s.name.as_str()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::{run_crawl, CrawlPolicy, CursorEncoding, UnitState};
    use crate::jobs::extract::{FieldRole, IdSegment, MetricKind};
    use crate::jobs::testing::{FakeSite, Node, Page};
    use crate::models::MetricValue;
    use crate::repository::DbContext;
    use tempfile::tempdir;

    const BASE: &str = "https://rank.test/daily";

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn config() -> RankingJobConfig {
        RankingJobConfig {
            service: Service::PlayboardCo,
            url: BASE.to_string(),
            login: Vec::new(),
            setup: vec![PageAction::click_optional(".menu__language")],
            categories: Some(CategoryConfig {
                selector: ".shelf li".into(),
                label_selector: Some("span".into()),
                limit: None,
            }),
            cursor: CursorConfig::Dates {
                initial: DateSpec::Fixed(day(1)),
                target: DateSpec::Fixed(day(2)),
            },
            cursor_param: Some(CursorParam {
                name: "period".into(),
                encoding: CursorEncoding::IsoDate,
            }),
            list_selector: ".sheet".into(),
            rows: RowQuery::new(".chart__row").excluding(".ad__slot"),
            count_rows: None,
            load_trigger: None,
            target_count: 2,
            max_load_attempts: 2,
            fields: vec![
                FieldSpec::attr(
                    "td > a",
                    "href",
                    FieldRole::ChannelId {
                        segment: IdSegment::Last,
                    },
                ),
                FieldSpec::text("h3", FieldRole::Name),
                FieldSpec::metric(".score", "dailySuperChat", MetricKind::Integer),
            ],
            key: KeyMode::Daily,
            row_date: DateSpec::Today,
            settle_ms: 0,
            challenge_wait_secs: None,
            wait_secs: 1,
            user_agent: None,
            cookies: Vec::new(),
        }
    }

    fn channel_row(site: &mut FakeSite, id: &str, score: &str) -> usize {
        let link = site.add(Node::default().attr("href", &format!("https://rank.test/channel/{}", id)));
        let name = site.add(Node::text(&format!("{} name", id)));
        let score = site.add(Node::text(score));
        site.add(
            Node::default()
                .child("td > a", link)
                .child("h3", name)
                .child(".score", score),
        )
    }

    /// Two categories, two dates, one ad row on every list.
    fn build_site() -> FakeSite {
        let mut site = FakeSite::default();
        let mut items = Vec::new();
        for (i, cat) in ["Music", "Gaming"].iter().enumerate() {
            let label = site.add(Node::text(cat));
            let url = format!("{}/{}", BASE, cat.to_lowercase());
            items.push(site.add(Node::default().child("span", label).link(&url)));

            for d in [1, 2] {
                let ad_slot = site.add(Node::default());
                let ad = site.add(Node::default().child(".ad__slot", ad_slot));
                let a = channel_row(&mut site, &format!("UC{}{}a", i, d), "1,000");
                let b = channel_row(&mut site, &format!("UC{}{}b", i, d), "2,500");
                let sheet = site.add(Node::default());
                site.page(
                    &format!("{}?period=2025-03-0{}", url, d),
                    Page::default()
                        .with(".sheet", vec![sheet])
                        .with(".chart__row", vec![a, ad, b]),
                );
            }
            site.page(&url, Page::default());
        }
        site.page(BASE, Page::default().with(".shelf li", items));
        site
    }

    fn quick() -> CrawlPolicy {
        CrawlPolicy {
            retry_budget: 1,
            backoff: Duration::ZERO,
            pacing: Duration::ZERO,
            resume_after: None,
        }
    }

    fn instant() -> LoadOptions {
        LoadOptions {
            settle_delay: Duration::ZERO,
            progress_timeout: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_crawls_every_date_and_category() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_sqlite_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let store = ctx.snapshots();

        let job = RankingJob::new("playboard-super-chatted", config(), day(20))
            .with_load_options(instant());
        let mut site = build_site();

        let report = run_crawl(&job, &mut site, &store, &quick()).await.unwrap();

        assert_eq!(report.units.len(), 4);
        assert!(report.units.iter().all(|u| u.state == UnitState::Completed));
        assert_eq!(report.rows_persisted, 8);
        // ad rows are neither persisted nor mapped
        assert_eq!(report.rows_skipped, 4);
        assert_eq!(store.count().await.unwrap(), 8);

        let stored = store
            .list(Service::PlayboardCo, Some(day(2)), 100)
            .await
            .unwrap();
        assert_eq!(stored.len(), 4);
        let gaming = stored.iter().find(|s| s.channel_id == "UC12b").unwrap();
        assert_eq!(gaming.display.category.as_deref(), Some("Gaming"));
        assert_eq!(gaming.metric("dailySuperChat"), Some(MetricValue::Int(2500)));
    }

    #[tokio::test]
    async fn test_blocked_page_is_retried_then_skipped() {
        let mut site = build_site();
        site.page(
            &format!("{}/music?period=2025-03-01", BASE),
            Page::default().status(429),
        );
        let mut cfg = config();
        cfg.cursor = CursorConfig::Dates {
            initial: DateSpec::Fixed(day(1)),
            target: DateSpec::Fixed(day(1)),
        };
        let job = RankingJob::new("playboard-super-chatted", cfg, day(20))
            .with_load_options(instant());

        let dir = tempdir().unwrap();
        let ctx = DbContext::from_sqlite_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let store = ctx.snapshots();

        let report = run_crawl(&job, &mut site, &store, &quick()).await.unwrap();
        assert_eq!(report.units[0].state, UnitState::FailedTerminal);
        assert_eq!(report.units[0].attempts, 2);
        assert!(report.units[0].error.as_deref().unwrap().contains("429"));
        assert_eq!(report.units[1].state, UnitState::Completed);
        assert_eq!(report.rows_persisted, 2);
    }

    #[tokio::test]
    async fn test_missing_categories_is_setup_error() {
        let mut site = FakeSite::default();
        site.page(BASE, Page::default());
        let job = RankingJob::new("playboard-broadcast", config(), day(20));
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_sqlite_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();

        let err = run_crawl(&job, &mut site, &ctx.snapshots(), &quick())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Setup(_)));
    }

    #[tokio::test]
    async fn test_login_skipped_without_credentials() {
        let mut cfg = config();
        cfg.login = vec![
            PageAction::Goto {
                url: "https://rank.test/signin".into(),
            },
            PageAction::Fill {
                selector: "input[name=\"email\"]".into(),
                env: "CHANSTATS_TEST_UNSET_EMAIL".into(),
            },
        ];
        let job = RankingJob::new("playboard-super-chatted", cfg, day(20));
        let mut site = build_site();
        let scopes = CrawlJob::<FakeSite>::prepare(&job, &mut site).await.unwrap();
        assert_eq!(scopes.len(), 2);
        assert!(!site.visits.iter().any(|v| v.contains("signin")));
    }

    #[test]
    fn test_latest_rows_have_no_date() {
        let mut cfg = config();
        cfg.key = KeyMode::Latest;
        let job = RankingJob::new("playboard-broadcast", cfg, day(20));
        let unit = WorkUnit {
            cursor: crate::crawl::CrawlCursor::Date(day(1)),
            scope: None,
        };
        assert_eq!(job.row_date(&unit), None);
    }
}
