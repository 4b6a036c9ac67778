//! The cursor crawl loop shared by every job.
//!
//! A job supplies setup, a cursor plan and a per-unit fetch; the engine walks
//! cursor × scope units in order, retries recoverable failures with backoff,
//! streams mapped rows into the store and records what happened.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cursor::{CrawlCursor, CursorPlan, CursorStep};
use super::error::{CrawlError, UnitError};
use super::report::{CrawlReport, UnitReport, UnitState};
use crate::models::ChannelSnapshot;
use crate::repository::SnapshotStore;

/// A sub-division of each cursor, e.g. one ranking category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    /// Position in the list it was discovered from.
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Scope {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// One item of work: a cursor position within an optional scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub cursor: CrawlCursor,
    pub scope: Option<Scope>,
}

impl WorkUnit {
    /// The cursor date, for jobs whose rows are dated by it.
    pub fn date(&self) -> Option<NaiveDate> {
        match self.cursor {
            CrawlCursor::Date(d) => Some(d),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{} [{}]", self.cursor, scope.name),
            None => write!(f, "{}", self.cursor),
        }
    }
}

/// Raw rows read for one unit.
#[derive(Debug)]
pub struct UnitRows<R> {
    pub rows: Vec<R>,
    /// Rows dropped at the source because they were ads.
    pub sponsored: usize,
    /// Keyset position after this batch.
    pub next_key: Option<i64>,
}

impl<R> UnitRows<R> {
    pub fn new(rows: Vec<R>) -> Self {
        Self {
            rows,
            sponsored: 0,
            next_key: None,
        }
    }

    pub fn with_sponsored(mut self, sponsored: usize) -> Self {
        self.sponsored = sponsored;
        self
    }

    pub fn with_next_key(mut self, next_key: Option<i64>) -> Self {
        self.next_key = next_key;
        self
    }
}

/// A crawl expressed as configuration of the shared loop.
///
/// `C` is what the job fetches through: a page driver or an API client.
#[async_trait]
pub trait CrawlJob<C: Send + ?Sized>: Send + Sync {
    type Row: Send;

    fn id(&self) -> &str;

    fn plan(&self) -> CursorPlan;

    /// Login, category discovery and the like. An empty list means unscoped.
    async fn prepare(&self, ctx: &mut C) -> Result<Vec<Scope>, CrawlError>;

    async fn fetch_unit(
        &self,
        ctx: &mut C,
        store: &dyn SnapshotStore,
        unit: &WorkUnit,
    ) -> Result<UnitRows<Self::Row>, UnitError>;

    /// Put the context back into a usable state before a retry.
    async fn recover(&self, _ctx: &mut C, _unit: &WorkUnit) -> Result<(), UnitError> {
        Ok(())
    }

    fn map_row(&self, row: Self::Row, unit: &WorkUnit) -> Option<ChannelSnapshot>;
}

/// Retry and pacing knobs for one crawl.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlPolicy {
    /// Extra attempts per unit after the first.
    pub retry_budget: u32,
    /// Pause before retrying a failed unit.
    pub backoff: Duration,
    /// Pause after every unit.
    pub pacing: Duration,
    /// Skip dates up to this one.
    pub resume_after: Option<NaiveDate>,
}

impl Default for CrawlPolicy {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            backoff: Duration::from_secs(30),
            pacing: Duration::ZERO,
            resume_after: None,
        }
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Drive `job` over its whole cursor plan.
///
/// Only setup failures escape as errors; unit failures end up in the report.
pub async fn run_crawl<C, J>(
    job: &J,
    ctx: &mut C,
    store: &dyn SnapshotStore,
    policy: &CrawlPolicy,
) -> Result<CrawlReport, CrawlError>
where
    C: Send + ?Sized,
    J: CrawlJob<C> + ?Sized,
{
    let mut report = CrawlReport::new(job.id(), Utc::now());

    let scopes = job.prepare(ctx).await?;
    let scopes: Vec<Option<Scope>> = if scopes.is_empty() {
        vec![None]
    } else {
        info!("{}: {} scopes", job.id(), scopes.len());
        scopes.into_iter().map(Some).collect()
    };

    let mut plan = job.plan();
    if let Some(done) = policy.resume_after {
        plan = plan.resume_after(done);
    }

    let mut rows_so_far = 0usize;
    let mut cursor = plan.first();
    while let Some(current) = cursor {
        let mut step = CursorStep::default();

        for scope in &scopes {
            let unit = WorkUnit {
                cursor: current.clone(),
                scope: scope.clone(),
            };
            let (unit_report, raw_rows, next_key) = run_unit(job, ctx, store, policy, &unit).await;

            if unit_report.state == UnitState::Completed {
                step.succeeded = true;
                step.raw_rows += raw_rows;
                rows_so_far += unit_report.rows_persisted;
            }
            if next_key.is_some() {
                step.next_key = next_key;
            }
            report.push(unit_report);

            pause(policy.pacing).await;
        }

        cursor = plan.next(&current, &step, rows_so_far);
    }

    let report = report.finish();
    info!(
        "{}: {} units, {} rows persisted, {} skipped, {} failed",
        report.job_id,
        report.units.len(),
        report.rows_persisted,
        report.rows_skipped,
        report.failed_units().count()
    );
    Ok(report)
}

/// Process one unit through its state machine. Returns the report, the raw
/// row count of the successful attempt and the job's next keyset position.
async fn run_unit<C, J>(
    job: &J,
    ctx: &mut C,
    store: &dyn SnapshotStore,
    policy: &CrawlPolicy,
    unit: &WorkUnit,
) -> (UnitReport, usize, Option<i64>)
where
    C: Send + ?Sized,
    J: CrawlJob<C> + ?Sized,
{
    let mut report = UnitReport::pending(unit.cursor.clone(), unit.scope.clone());

    loop {
        report.state = UnitState::InProgress;
        report.attempts += 1;
        debug!("{}: unit {} attempt {}", job.id(), unit, report.attempts);

        let fetched = match job.fetch_unit(ctx, store, unit).await {
            Ok(fetched) => fetched,
            Err(e) if e.is_recoverable() && report.attempts <= policy.retry_budget => {
                report.state = UnitState::FailedRecoverable;
                report.error = Some(e.to_string());
                warn!(
                    "{}: unit {} failed ({}), retrying in {:?}",
                    job.id(),
                    unit,
                    e,
                    policy.backoff
                );
                pause(policy.backoff).await;
                if let Err(re) = job.recover(ctx, unit).await {
                    warn!("{}: recovery for {} failed: {}", job.id(), unit, re);
                }
                continue;
            }
            Err(e) => {
                warn!(
                    "{}: unit {} failed after {} attempt(s): {}",
                    job.id(),
                    unit,
                    report.attempts,
                    e
                );
                report.state = UnitState::FailedTerminal;
                report.error = Some(e.to_string());
                return (report, 0, None);
            }
        };

        let raw_rows = fetched.rows.len();
        let next_key = fetched.next_key;
        report.rows_skipped += fetched.sponsored;
        report.error = None;

        for row in fetched.rows {
            let Some(snapshot) = job.map_row(row, unit) else {
                report.rows_skipped += 1;
                continue;
            };
            if let Err(e) = store.upsert(&snapshot).await {
                let e = UnitError::from(e);
                warn!("{}: unit {} stopped at {}: {}", job.id(), unit, snapshot.key(), e);
                report.state = UnitState::FailedTerminal;
                report.error = Some(e.to_string());
                return (report, raw_rows, next_key);
            }
            report.rows_persisted += 1;
        }

        report.state = UnitState::Completed;
        info!(
            "{}: unit {} done, {} rows persisted",
            job.id(),
            unit,
            report.rows_persisted
        );
        return (report, raw_rows, next_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Service;
    use crate::repository::{PendingFilter, RosterEntry, StoreError};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<ChannelSnapshot>>,
    }

    #[async_trait]
    impl SnapshotStore for MemoryStore {
        async fn upsert(&self, snapshot: &ChannelSnapshot) -> Result<(), StoreError> {
            if snapshot.channel_id == "poison" {
                return Err(StoreError::Invalid("poison row".into()));
            }
            self.rows.lock().unwrap().push(snapshot.clone());
            Ok(())
        }

        async fn find_pending(
            &self,
            _: &PendingFilter,
            _: Option<i64>,
            _: i64,
        ) -> Result<Vec<RosterEntry>, StoreError> {
            Ok(Vec::new())
        }

        async fn find_known(
            &self,
            _: Service,
            _: Option<i64>,
            _: i64,
        ) -> Result<Vec<RosterEntry>, StoreError> {
            Ok(Vec::new())
        }
    }

    /// Calls recorded by the scripted job.
    #[derive(Default)]
    struct Calls {
        fetched: Vec<String>,
        recovered: u32,
    }

    struct ScriptedJob {
        plan: CursorPlan,
        scopes: Vec<Scope>,
        fail_day: Option<u32>,
        recoverable: bool,
        rows: Vec<&'static str>,
        setup_fails: bool,
    }

    impl ScriptedJob {
        fn days(n: u32) -> Self {
            Self {
                plan: CursorPlan::Dates {
                    start: day(1),
                    end: day(n),
                },
                scopes: Vec::new(),
                fail_day: None,
                recoverable: true,
                rows: vec!["a", "b"],
                setup_fails: false,
            }
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[async_trait]
    impl CrawlJob<Calls> for ScriptedJob {
        type Row = &'static str;

        fn id(&self) -> &str {
            "scripted"
        }

        fn plan(&self) -> CursorPlan {
            self.plan.clone()
        }

        async fn prepare(&self, _ctx: &mut Calls) -> Result<Vec<Scope>, CrawlError> {
            if self.setup_fails {
                return Err(CrawlError::setup("login rejected"));
            }
            Ok(self.scopes.clone())
        }

        async fn fetch_unit(
            &self,
            ctx: &mut Calls,
            _store: &dyn SnapshotStore,
            unit: &WorkUnit,
        ) -> Result<UnitRows<&'static str>, UnitError> {
            ctx.fetched.push(unit.to_string());
            if let (Some(fail), Some(date)) = (self.fail_day, unit.date()) {
                if date == day(fail) {
                    return Err(if self.recoverable {
                        UnitError::RateLimited("HTTP 429".into())
                    } else {
                        UnitError::Fatal("layout changed".into())
                    });
                }
            }
            Ok(UnitRows::new(self.rows.clone()).with_sponsored(1))
        }

        async fn recover(&self, ctx: &mut Calls, _unit: &WorkUnit) -> Result<(), UnitError> {
            ctx.recovered += 1;
            Ok(())
        }

        fn map_row(&self, row: &'static str, unit: &WorkUnit) -> Option<ChannelSnapshot> {
            if row.is_empty() {
                return None;
            }
            Some(ChannelSnapshot::new(row, Service::PlayboardCo, unit.date()).with_metric("dailySuperChat", 1i64))
        }
    }

    fn quick() -> CrawlPolicy {
        CrawlPolicy {
            retry_budget: 2,
            backoff: Duration::ZERO,
            pacing: Duration::ZERO,
            resume_after: None,
        }
    }

    #[tokio::test]
    async fn test_failing_unit_is_skipped_after_retries() {
        let job = ScriptedJob {
            fail_day: Some(3),
            ..ScriptedJob::days(5)
        };
        let store = MemoryStore::default();
        let mut calls = Calls::default();

        let report = run_crawl(&job, &mut calls, &store, &quick()).await.unwrap();

        let states: Vec<UnitState> = report.units.iter().map(|u| u.state).collect();
        assert_eq!(
            states,
            vec![
                UnitState::Completed,
                UnitState::Completed,
                UnitState::FailedTerminal,
                UnitState::Completed,
                UnitState::Completed,
            ]
        );
        assert_eq!(report.units[2].attempts, 3);
        assert_eq!(calls.recovered, 2);
        assert_eq!(report.rows_persisted, 8);
        assert_eq!(report.rows_skipped, 4);
        assert_eq!(store.rows.lock().unwrap().len(), 8);
        assert_eq!(report.units.last().unwrap().cursor, CrawlCursor::Date(day(5)));
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let job = ScriptedJob {
            fail_day: Some(2),
            recoverable: false,
            ..ScriptedJob::days(2)
        };
        let mut calls = Calls::default();
        let report = run_crawl(&job, &mut calls, &MemoryStore::default(), &quick())
            .await
            .unwrap();
        assert_eq!(report.units[1].attempts, 1);
        assert_eq!(report.units[1].error.as_deref(), Some("layout changed"));
        assert_eq!(calls.recovered, 0);
    }

    #[tokio::test]
    async fn test_setup_failure_aborts() {
        let job = ScriptedJob {
            setup_fails: true,
            ..ScriptedJob::days(3)
        };
        let mut calls = Calls::default();
        let err = run_crawl(&job, &mut calls, &MemoryStore::default(), &quick())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("login rejected"));
        assert!(calls.fetched.is_empty());
    }

    #[tokio::test]
    async fn test_units_walk_cursor_then_scope() {
        let job = ScriptedJob {
            scopes: vec![Scope::new("Music", 0), Scope::new("Gaming", 1)],
            ..ScriptedJob::days(2)
        };
        let mut calls = Calls::default();
        run_crawl(&job, &mut calls, &MemoryStore::default(), &quick())
            .await
            .unwrap();
        assert_eq!(
            calls.fetched,
            vec![
                "2025-03-01 [Music]",
                "2025-03-01 [Gaming]",
                "2025-03-02 [Music]",
                "2025-03-02 [Gaming]",
            ]
        );
    }

    #[tokio::test]
    async fn test_persistence_error_fails_unit_and_crawl_continues() {
        let job = ScriptedJob {
            rows: vec!["a", "poison", "c"],
            ..ScriptedJob::days(2)
        };
        let store = MemoryStore::default();
        let mut calls = Calls::default();
        let report = run_crawl(&job, &mut calls, &store, &quick()).await.unwrap();

        assert_eq!(report.units.len(), 2);
        assert!(report
            .units
            .iter()
            .all(|u| u.state == UnitState::FailedTerminal && u.attempts == 1));
        assert_eq!(report.rows_persisted, 2);
        assert_eq!(calls.fetched.len(), 2);
    }

    #[tokio::test]
    async fn test_unmapped_rows_are_skipped() {
        let job = ScriptedJob {
            rows: vec!["a", "", "c"],
            plan: CursorPlan::Once,
            ..ScriptedJob::days(1)
        };
        let report = run_crawl(&job, &mut Calls::default(), &MemoryStore::default(), &quick())
            .await
            .unwrap();
        assert_eq!(report.rows_persisted, 2);
        // one unmapped row plus one ad
        assert_eq!(report.rows_skipped, 2);
    }

    #[tokio::test]
    async fn test_resume_skips_completed_dates() {
        let job = ScriptedJob::days(5);
        let mut calls = Calls::default();
        let policy = CrawlPolicy {
            resume_after: Some(day(3)),
            ..quick()
        };
        let report = run_crawl(&job, &mut calls, &MemoryStore::default(), &policy)
            .await
            .unwrap();
        assert_eq!(calls.fetched, vec!["2025-03-04", "2025-03-05"]);
        assert_eq!(report.resume_hint(), Some(day(5)));
    }
}
