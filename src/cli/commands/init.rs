//! Initialize command.

use console::style;

use crate::config::Settings;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let ctx = settings.create_db_context();
    ctx.init_schema().await?;

    let jobs = settings.job_definitions();
    let enabled = jobs.iter().filter(|j| j.enabled).count();
    println!(
        "  {} {} jobs configured ({} enabled)",
        style("✓").green(),
        jobs.len(),
        enabled
    );
    println!(
        "{} Initialized chanstats database at {}",
        style("✓").green(),
        settings.database_url()
    );

    Ok(())
}
