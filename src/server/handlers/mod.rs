//! HTTP request handlers for the web server.

mod api;
mod jobs;

pub use api::{api_crawl_state, health};
pub use jobs::{api_job_status, api_jobs, api_run_job};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// `{"message": ...}` with the given status.
pub(crate) fn message(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "message": message.into() })),
    )
        .into_response()
}
