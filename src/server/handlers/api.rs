//! Service-level endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::super::AppState;
use super::message;
use crate::scrapers::DriverFactory;

/// Health check endpoint for container orchestration.
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Last-run bookkeeping for every job that has ever run.
pub async fn api_crawl_state<F: DriverFactory>(State(state): State<AppState<F>>) -> Response {
    match state.runner.db().crawl_state().get_all().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
