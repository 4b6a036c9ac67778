//! Cron scheduling of enabled jobs.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::runner::{JobRunner, RunError};
use crate::scrapers::DriverFactory;

/// Register every enabled job with `scheduler`. Returns how many were added.
pub async fn schedule_jobs<F: DriverFactory>(
    scheduler: &JobScheduler,
    runner: Arc<JobRunner<F>>,
) -> Result<usize> {
    let tz = runner.timezone();
    let mut added = 0;

    for def in runner.jobs().iter().filter(|j| j.enabled) {
        let job_id = def.id.clone();
        let job_runner = runner.clone();
        let job = Job::new_async_tz(def.schedule.as_str(), tz, move |_uuid, _lock| {
            let runner = job_runner.clone();
            let job_id = job_id.clone();
            Box::pin(async move {
                match runner.run(&job_id).await {
                    Ok(_) => {}
                    Err(RunError::AlreadyRunning(_)) => {
                        info!("{}: previous run still going, skipping tick", job_id)
                    }
                    Err(e) => error!("{}: scheduled run failed: {}", job_id, e),
                }
            })
        })
        .with_context(|| format!("invalid schedule {:?} for {}", def.schedule, def.id))?;

        scheduler
            .add(job)
            .await
            .with_context(|| format!("scheduling {}", def.id))?;
        info!("{}: scheduled at {} ({})", def.id, def.schedule, tz);
        added += 1;
    }

    Ok(added)
}

/// Build a scheduler for every enabled job and start it.
pub async fn start<F: DriverFactory>(runner: Arc<JobRunner<F>>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .context("creating scheduler")?;
    let added = schedule_jobs(&scheduler, runner).await?;
    scheduler.start().await.context("starting scheduler")?;
    info!("Scheduler started with {} jobs", added);
    Ok(scheduler)
}
