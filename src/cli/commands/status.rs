//! Crawl state display.

use console::style;

use crate::config::Settings;

use super::super::helpers::styled_status;

/// Print the last run of every job that has ever run.
pub async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    ctx.init_schema().await?;

    let states = ctx.crawl_state().get_all().await?;
    if states.is_empty() {
        println!("{} No job has run yet", style("!").yellow());
        return Ok(());
    }

    let snapshots = ctx.snapshots();
    let counts = snapshots.count_by_service().await?;
    let tz = settings.timezone;

    println!("\n{}", style("Crawl State").bold());
    println!("{}", "-".repeat(40));
    for state in &states {
        println!(
            "{:<28} {:<10} {}",
            state.job_id,
            styled_status(state.last_status),
            state.last_crawled_at.with_timezone(&tz).format("%Y-%m-%d %H:%M")
        );
        if let Some(cursor) = &state.last_cursor {
            println!("  {} resume after {}", style("↳").dim(), cursor);
        }
        if let Some(error) = &state.last_error {
            println!("  {} {}", style("✗").red(), error);
        }
    }

    println!("\n{}", style("Snapshots").bold());
    println!("{}", "-".repeat(40));
    for (service, count) in counts {
        println!("{:<28} {}", service, count);
    }
    println!("{:<28} {}", "total", snapshots.count().await?);

    Ok(())
}
