//! Job runner: turns a [`JobDefinition`] into a crawl and records the outcome.
//!
//! The runner owns the per-job run state. A job can be running at most once;
//! a second request while it runs is refused without touching the browser.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::crawl::{run_crawl, CrawlError, CrawlJob, CrawlPolicy, CrawlReport, LoadOptions};
use crate::jobs::{JobDefinition, JobTemplate, RankingJob, RosterJob, StationJob, YoutubeJob};
use crate::models::CrawlStatus;
use crate::repository::DbContext;
use crate::scrapers::{ApiClient, BoundedDriver, BrowserSession, DriverFactory, SessionOptions};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("job {0} is already running")]
    AlreadyRunning(String),

    #[error("job {0} is disabled")]
    Disabled(String),

    #[error("{0}")]
    Setup(String),
}

impl From<CrawlError> for RunError {
    fn from(e: CrawlError) -> Self {
        Self::Setup(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running { started_at: DateTime<Utc> },
}

/// How the previous run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub finished_at: DateTime<Utc>,
    pub status: CrawlStatus,
    pub rows_persisted: usize,
    pub rows_skipped: usize,
    pub failed_units: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    fn from_report(report: &CrawlReport) -> Self {
        Self {
            finished_at: report.finished_at,
            status: report.status(),
            rows_persisted: report.rows_persisted,
            rows_skipped: report.rows_skipped,
            failed_units: report.failed_units().count(),
            error: report.error_summary(),
        }
    }

    fn failed(error: &RunError) -> Self {
        Self {
            finished_at: Utc::now(),
            status: CrawlStatus::Failed,
            rows_persisted: 0,
            rows_skipped: 0,
            failed_units: 0,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    #[serde(flatten)]
    pub state: JobState,
    pub last_run: Option<RunSummary>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            state: JobState::Idle,
            last_run: None,
        }
    }
}

/// Marks a job running for as long as it lives.
pub struct RunGuard<'a> {
    states: &'a Mutex<HashMap<String, JobStatus>>,
    job_id: String,
    summary: Option<RunSummary>,
}

impl RunGuard<'_> {
    fn record(&mut self, summary: RunSummary) {
        self.summary = Some(summary);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let Ok(mut states) = self.states.lock() else {
            return;
        };
        let status = states.entry(self.job_id.clone()).or_default();
        status.state = JobState::Idle;
        if let Some(summary) = self.summary.take() {
            status.last_run = Some(summary);
        }
    }
}

pub struct JobRunner<F: DriverFactory> {
    jobs: Vec<JobDefinition>,
    db: DbContext,
    factory: F,
    api: ApiClient,
    op_timeout: Duration,
    tz: Tz,
    load: LoadOptions,
    states: Mutex<HashMap<String, JobStatus>>,
}

impl<F: DriverFactory> JobRunner<F> {
    pub fn new(
        jobs: Vec<JobDefinition>,
        db: DbContext,
        factory: F,
        api: ApiClient,
        op_timeout: Duration,
        tz: Tz,
    ) -> Self {
        Self {
            jobs,
            db,
            factory,
            api,
            op_timeout,
            tz,
            load: LoadOptions::default(),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_load_options(mut self, load: LoadOptions) -> Self {
        self.load = load;
        self
    }

    pub fn jobs(&self) -> &[JobDefinition] {
        &self.jobs
    }

    pub fn job(&self, job_id: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.id == job_id)
    }

    pub fn db(&self) -> &DbContext {
        &self.db
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// The current day where the crawled sites publish their rankings.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.job(job_id)?;
        let states = self.states.lock().ok()?;
        Some(states.get(job_id).cloned().unwrap_or_default())
    }

    /// Mark `job_id` running, or refuse if it already is.
    pub fn claim(&self, job_id: &str) -> Result<RunGuard<'_>, RunError> {
        let mut states = self
            .states
            .lock()
            .map_err(|_| RunError::Setup("run state lock poisoned".to_string()))?;
        let status = states.entry(job_id.to_string()).or_default();
        if matches!(status.state, JobState::Running { .. }) {
            return Err(RunError::AlreadyRunning(job_id.to_string()));
        }
        status.state = JobState::Running {
            started_at: Utc::now(),
        };
        Ok(RunGuard {
            states: &self.states,
            job_id: job_id.to_string(),
            summary: None,
        })
    }

    /// Run one job to completion.
    pub async fn run(&self, job_id: &str) -> Result<CrawlReport, RunError> {
        let def = self
            .job(job_id)
            .ok_or_else(|| RunError::UnknownJob(job_id.to_string()))?;
        if !def.enabled {
            return Err(RunError::Disabled(job_id.to_string()));
        }
        let mut guard = self.claim(job_id)?;

        info!("{}: starting {} crawl", def.id, def.template.kind());
        let state = self.db.crawl_state();
        if let Err(e) = state.touch(&def.id, def.service).await {
            warn!("{}: could not record run start: {}", def.id, e);
        }

        let result = match self.resume_after(def).await {
            Ok(resume_after) => {
                let policy = def.policy.to_policy(resume_after);
                self.dispatch(def, &policy).await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(report) => {
                let status = report.status();
                let error = report.error_summary();
                let cursor = report.resume_hint().map(|d| d.to_string());
                if let Err(e) = state
                    .finish(&def.id, status, error.as_deref(), cursor.as_deref())
                    .await
                {
                    warn!("{}: could not record run end: {}", def.id, e);
                }
                info!(
                    "{}: {} ({} rows, {} skipped, {} units failed)",
                    def.id,
                    status.as_str(),
                    report.rows_persisted,
                    report.rows_skipped,
                    report.failed_units().count()
                );
                guard.record(RunSummary::from_report(report));
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(e) = state
                    .finish(&def.id, CrawlStatus::Failed, Some(&message), None)
                    .await
                {
                    warn!("{}: could not record run end: {}", def.id, e);
                }
                error!("{}: crawl failed: {}", def.id, message);
                guard.record(RunSummary::failed(e));
            }
        }

        result
    }

    /// Run every enabled job, one after another.
    pub async fn run_all(&self) -> Vec<(String, Result<CrawlReport, RunError>)> {
        let mut results = Vec::new();
        for def in self.jobs.iter().filter(|j| j.enabled) {
            let result = self.run(&def.id).await;
            results.push((def.id.clone(), result));
        }
        results
    }

    async fn resume_after(&self, def: &JobDefinition) -> Result<Option<NaiveDate>, RunError> {
        if !def.resume {
            return Ok(None);
        }
        let stored = self
            .db
            .crawl_state()
            .get(&def.id)
            .await
            .map_err(|e| RunError::Setup(format!("reading crawl state: {}", e)))?;
        let cursor = stored.and_then(|s| s.last_cursor);
        Ok(cursor.and_then(|c| match c.parse::<NaiveDate>() {
            Ok(day) => {
                info!("{}: resuming after {}", def.id, day);
                Some(day)
            }
            Err(_) => {
                warn!("{}: ignoring unreadable resume cursor {:?}", def.id, c);
                None
            }
        }))
    }

    async fn dispatch(
        &self,
        def: &JobDefinition,
        policy: &CrawlPolicy,
    ) -> Result<CrawlReport, RunError> {
        let today = self.today();
        match &def.template {
            JobTemplate::Ranking(config) => {
                let job = RankingJob::new(&def.id, config.clone(), today)
                    .with_load_options(self.load);
                self.with_browser(&job, config.session(), policy).await
            }
            JobTemplate::Roster(config) => {
                let job = RosterJob::new(&def.id, config.clone());
                self.with_browser(&job, config.session(), policy).await
            }
            JobTemplate::Youtube(config) => {
                let job = YoutubeJob::new(&def.id, config.clone(), today);
                self.with_api(&job, policy).await
            }
            JobTemplate::Station(config) => {
                let job = StationJob::new(&def.id, config.clone());
                self.with_api(&job, policy).await
            }
        }
    }

    /// Open a browser session, crawl, and close the session whatever happened.
    async fn with_browser<J>(
        &self,
        job: &J,
        session: SessionOptions,
        policy: &CrawlPolicy,
    ) -> Result<CrawlReport, RunError>
    where
        J: CrawlJob<BoundedDriver<F::Driver>>,
    {
        let driver = self
            .factory
            .open(&session)
            .await
            .map_err(|e| RunError::Setup(format!("opening browser: {}", e)))?;
        let driver = BoundedDriver::new(driver, self.op_timeout);
        let mut session = BrowserSession::new(job.id(), driver);
        let store = self.db.snapshots();

        // Dropping the session on panic or cancellation still closes the browser.
        let result = match session.driver() {
            Ok(driver) => run_crawl(job, driver, &store, policy).await,
            Err(e) => return Err(RunError::Setup(e.to_string())),
        };
        if let Err(e) = session.close().await {
            warn!("{}: closing browser: {}", job.id(), e);
        }
        Ok(result?)
    }

    async fn with_api<J>(&self, job: &J, policy: &CrawlPolicy) -> Result<CrawlReport, RunError>
    where
        J: CrawlJob<ApiClient>,
    {
        let mut api = self.api.clone();
        let store = self.db.snapshots();
        Ok(run_crawl(job, &mut api, &store, policy).await?)
    }
}
