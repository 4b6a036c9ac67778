//! Job listing and manual triggers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::super::AppState;
use super::message;
use crate::models::Service;
use crate::runner::{JobStatus, RunError};
use crate::scrapers::DriverFactory;

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub service: Service,
    pub kind: &'static str,
    pub schedule: String,
    pub enabled: bool,
    pub description: String,
    pub status: JobStatus,
}

pub async fn api_jobs<F: DriverFactory>(State(state): State<AppState<F>>) -> Json<Vec<JobSummary>> {
    let runner = &state.runner;
    let jobs = runner
        .jobs()
        .iter()
        .map(|def| JobSummary {
            id: def.id.clone(),
            service: def.service,
            kind: def.template.kind(),
            schedule: def.schedule.clone(),
            enabled: def.enabled,
            description: def.description.clone(),
            status: runner.status(&def.id).unwrap_or_default(),
        })
        .collect();
    Json(jobs)
}

pub async fn api_job_status<F: DriverFactory>(
    State(state): State<AppState<F>>,
    Path(job_id): Path<String>,
) -> Response {
    match state.runner.status(&job_id) {
        Some(status) => Json(status).into_response(),
        None => message(StatusCode::NOT_FOUND, format!("unknown job: {}", job_id)),
    }
}

/// Run a job and answer with its crawl report once it finishes.
pub async fn api_run_job<F: DriverFactory>(
    State(state): State<AppState<F>>,
    Path(job_id): Path<String>,
) -> Response {
    match state.runner.run(&job_id).await {
        Ok(report) => Json(report).into_response(),
        Err(e @ RunError::UnknownJob(_)) => message(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ (RunError::AlreadyRunning(_) | RunError::Disabled(_))) => {
            message(StatusCode::CONFLICT, e.to_string())
        }
        Err(e @ RunError::Setup(_)) => message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
