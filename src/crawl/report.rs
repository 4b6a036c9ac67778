//! Per-unit and per-crawl outcome records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::cursor::CrawlCursor;
use super::engine::Scope;
use crate::models::CrawlStatus;

/// Lifecycle of one work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    InProgress,
    Completed,
    /// Failed, with retries left.
    FailedRecoverable,
    /// Failed for good; the crawl moved on.
    FailedTerminal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    pub cursor: CrawlCursor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    pub state: UnitState,
    pub attempts: u32,
    pub rows_persisted: usize,
    pub rows_skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnitReport {
    pub fn pending(cursor: CrawlCursor, scope: Option<Scope>) -> Self {
        Self {
            cursor,
            scope,
            state: UnitState::Pending,
            attempts: 0,
            rows_persisted: 0,
            rows_skipped: 0,
            error: None,
        }
    }
}

/// Everything a crawl did, in processing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlReport {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: Vec<UnitReport>,
    pub rows_persisted: usize,
    pub rows_skipped: usize,
}

impl CrawlReport {
    pub fn new(job_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.to_string(),
            started_at,
            finished_at: started_at,
            units: Vec::new(),
            rows_persisted: 0,
            rows_skipped: 0,
        }
    }

    pub fn push(&mut self, unit: UnitReport) {
        self.rows_persisted += unit.rows_persisted;
        self.rows_skipped += unit.rows_skipped;
        self.units.push(unit);
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn failed_units(&self) -> impl Iterator<Item = &UnitReport> {
        self.units
            .iter()
            .filter(|u| u.state == UnitState::FailedTerminal)
    }

    /// `Completed` when every unit completed, `Partial` otherwise.
    pub fn status(&self) -> CrawlStatus {
        if self.failed_units().next().is_some() {
            CrawlStatus::Partial
        } else {
            CrawlStatus::Completed
        }
    }

    /// Latest date every unit of which completed.
    ///
    /// Stops at the first date with a failed unit so a resumed crawl retries it.
    pub fn resume_hint(&self) -> Option<NaiveDate> {
        let mut hint = None;
        // Day whose units have all completed so far; committed once the next day starts.
        let mut open_day: Option<NaiveDate> = None;
        for unit in &self.units {
            let CrawlCursor::Date(day) = &unit.cursor else {
                continue;
            };
            let day = *day;
            if open_day.is_some_and(|d| d != day) {
                hint = hint.max(open_day);
            }
            if unit.state != UnitState::Completed {
                return hint;
            }
            open_day = Some(day);
        }
        hint.max(open_day)
    }

    /// One-line summary of failures, for the crawl state table.
    pub fn error_summary(&self) -> Option<String> {
        let failed: Vec<String> = self
            .failed_units()
            .map(|u| {
                let scope = u
                    .scope
                    .as_ref()
                    .map(|s| format!(" [{}]", s.name))
                    .unwrap_or_default();
                format!(
                    "{}{}: {}",
                    u.cursor,
                    scope,
                    u.error.as_deref().unwrap_or("failed")
                )
            })
            .collect();
        if failed.is_empty() {
            None
        } else {
            Some(format!("{} unit(s) failed; {}", failed.len(), failed.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(day: u32, state: UnitState, rows: usize) -> UnitReport {
        UnitReport {
            state,
            rows_persisted: rows,
            attempts: 1,
            ..UnitReport::pending(
                CrawlCursor::Date(NaiveDate::from_ymd_opt(2025, 3, day).unwrap()),
                None,
            )
        }
    }

    #[test]
    fn test_totals_and_status() {
        let mut report = CrawlReport::new("playboard-super-chatted", Utc::now());
        report.push(unit(1, UnitState::Completed, 90));
        report.push(unit(2, UnitState::Completed, 95));
        assert_eq!(report.rows_persisted, 185);
        assert_eq!(report.status(), CrawlStatus::Completed);
        assert_eq!(report.error_summary(), None);

        let mut failed = unit(3, UnitState::FailedTerminal, 0);
        failed.error = Some("rate limited: HTTP 429".into());
        report.push(failed);
        assert_eq!(report.status(), CrawlStatus::Partial);
        assert_eq!(
            report.error_summary().as_deref(),
            Some("1 unit(s) failed; 2025-03-03: rate limited: HTTP 429")
        );
    }

    #[test]
    fn test_resume_hint_stops_at_first_failure() {
        let mut report = CrawlReport::new("playboard-super-chatted", Utc::now());
        report.push(unit(1, UnitState::Completed, 1));
        report.push(unit(2, UnitState::Completed, 1));
        report.push(unit(3, UnitState::FailedTerminal, 0));
        report.push(unit(4, UnitState::Completed, 1));
        assert_eq!(
            report.resume_hint(),
            NaiveDate::from_ymd_opt(2025, 3, 2)
        );
    }

    fn scoped(day: u32, category: &str, state: UnitState) -> UnitReport {
        let scope = Scope {
            name: category.to_string(),
            index: 0,
            key: None,
        };
        UnitReport {
            scope: Some(scope),
            ..unit(day, state, 0)
        }
    }

    #[test]
    fn test_resume_hint_needs_every_category_of_a_day() {
        let mut report = CrawlReport::new("playboard-super-chatted", Utc::now());
        report.push(scoped(1, "Music", UnitState::Completed));
        report.push(scoped(1, "Gaming", UnitState::FailedTerminal));
        report.push(scoped(2, "Music", UnitState::Completed));
        assert_eq!(report.resume_hint(), None);

        let mut report = CrawlReport::new("playboard-super-chatted", Utc::now());
        report.push(scoped(1, "Music", UnitState::Completed));
        report.push(scoped(1, "Gaming", UnitState::Completed));
        report.push(scoped(2, "Music", UnitState::Completed));
        report.push(scoped(2, "Gaming", UnitState::FailedTerminal));
        assert_eq!(report.resume_hint(), NaiveDate::from_ymd_opt(2025, 3, 1));

        let mut report = CrawlReport::new("playboard-super-chatted", Utc::now());
        report.push(scoped(1, "Music", UnitState::Completed));
        report.push(scoped(1, "Gaming", UnitState::Completed));
        assert_eq!(report.resume_hint(), NaiveDate::from_ymd_opt(2025, 3, 1));
    }

    #[test]
    fn test_resume_hint_ignores_non_date_cursors() {
        let mut report = CrawlReport::new("viewership", Utc::now());
        report.push(UnitReport::pending(CrawlCursor::Page(1), None));
        assert_eq!(report.resume_hint(), None);
    }
}
