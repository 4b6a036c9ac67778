//! Job listing and one-off runs.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Settings;

use super::super::helpers::{build_runner, print_report};

/// List every job with its schedule.
pub fn cmd_list(settings: &Settings) -> anyhow::Result<()> {
    let jobs = settings.job_definitions();
    println!(
        "{:<28} {:<10} {:<16} {}",
        style("JOB").bold(),
        style("KIND").bold(),
        style("SCHEDULE").bold(),
        style("DESCRIPTION").bold()
    );
    for def in &jobs {
        let id = if def.enabled {
            def.id.clone()
        } else {
            style(format!("{} (off)", def.id)).dim().to_string()
        };
        println!(
            "{:<28} {:<10} {:<16} {}",
            id,
            def.template.kind(),
            def.schedule,
            def.description
        );
    }
    println!("\nTimes are in {}", settings.timezone);
    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Run one job and print its report.
pub async fn cmd_run(settings: &Settings, job_id: &str, json: bool) -> anyhow::Result<()> {
    let runner = build_runner(settings).await?;

    let pb = spinner(format!("Running {}", job_id));
    let result = runner.run(job_id).await;
    pb.finish_and_clear();

    match result {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", style("✗").red(), e);
            Err(e.into())
        }
    }
}

/// Run every enabled job in turn. Fails if any job could not run.
pub async fn cmd_run_all(settings: &Settings) -> anyhow::Result<()> {
    let runner = build_runner(settings).await?;

    let enabled = runner.jobs().iter().filter(|j| j.enabled).count();
    println!("{} Running {} jobs", style("→").cyan(), enabled);

    let mut failed = 0;
    for (job_id, result) in runner.run_all().await {
        match result {
            Ok(report) => print_report(&report),
            Err(e) => {
                failed += 1;
                println!("{} {}: {}", style("✗").red(), job_id, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} jobs failed", failed, enabled);
    }
    Ok(())
}
