//! Router configuration for the web server.

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;
use crate::scrapers::DriverFactory;

/// Create the main router with all routes.
pub fn create_router<F: DriverFactory>(state: AppState<F>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Jobs
        .route("/api/jobs", get(handlers::api_jobs::<F>))
        .route(
            "/api/jobs/:job_id/run",
            get(handlers::api_run_job::<F>).post(handlers::api_run_job::<F>),
        )
        .route("/api/jobs/:job_id/status", get(handlers::api_job_status::<F>))
        // Crawl bookkeeping
        .route("/api/crawl-state", get(handlers::api_crawl_state::<F>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
