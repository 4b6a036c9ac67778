//! Shared helper functions for CLI commands.

use std::time::Duration;

use anyhow::Context;
use console::style;

use crate::config::Settings;
use crate::crawl::{CrawlReport, UnitState};
use crate::models::CrawlStatus;
use crate::runner::JobRunner;
use crate::scrapers::{ApiClient, ChromiumFactory};

/// Open the database and build a runner over the configured jobs.
pub async fn build_runner(settings: &Settings) -> anyhow::Result<JobRunner<ChromiumFactory>> {
    settings.ensure_directories()?;
    let db = settings.create_db_context();
    db.init_schema()
        .await
        .with_context(|| format!("opening database {}", settings.database_url()))?;

    let api = ApiClient::new(
        Duration::from_secs(settings.network_timeout),
        settings.user_agent.as_deref(),
    )?;

    Ok(JobRunner::new(
        settings.job_definitions(),
        db,
        ChromiumFactory::new(settings.browser.clone()),
        api,
        Duration::from_secs(settings.browser.timeout),
        settings.timezone,
    ))
}

pub fn styled_status(status: CrawlStatus) -> String {
    match status {
        CrawlStatus::Completed => style(status.as_str()).green().to_string(),
        CrawlStatus::Partial => style(status.as_str()).yellow().to_string(),
        CrawlStatus::Failed => style(status.as_str()).red().to_string(),
        CrawlStatus::Running => style(status.as_str()).cyan().to_string(),
    }
}

/// Print a crawl report: a summary line, then every failed unit.
pub fn print_report(report: &CrawlReport) {
    let status = report.status();
    let mark = match status {
        CrawlStatus::Completed => style("✓").green(),
        _ => style("!").yellow(),
    };
    println!(
        "{} {}: {} ({} rows saved, {} skipped, {} units in {}s)",
        mark,
        report.job_id,
        styled_status(status),
        report.rows_persisted,
        report.rows_skipped,
        report.units.len(),
        (report.finished_at - report.started_at).num_seconds()
    );

    for unit in &report.units {
        if unit.state != UnitState::FailedTerminal {
            continue;
        }
        let scope = unit
            .scope
            .as_ref()
            .map(|s| format!(" [{}]", s.name))
            .unwrap_or_default();
        println!(
            "  {} {}{} after {} attempts: {}",
            style("✗").red(),
            unit.cursor,
            scope,
            unit.attempts,
            unit.error.as_deref().unwrap_or("failed")
        );
    }
}
