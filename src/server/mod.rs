//! HTTP surface for listing jobs, triggering runs and reading crawl state.

mod handlers;
mod routes;

pub use routes::create_router;

use std::sync::Arc;

use crate::runner::JobRunner;
use crate::scrapers::DriverFactory;

/// Shared state for the web server.
pub struct AppState<F: DriverFactory> {
    pub runner: Arc<JobRunner<F>>,
}

impl<F: DriverFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
        }
    }
}

impl<F: DriverFactory> AppState<F> {
    pub fn new(runner: Arc<JobRunner<F>>) -> Self {
        Self { runner }
    }
}

/// Start the web server.
pub async fn serve<F: DriverFactory>(
    runner: Arc<JobRunner<F>>,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let app = create_router(AppState::new(runner));

    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!("Starting server at http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::jobs::catalog;
    use crate::jobs::testing::FakeFactory;
    use crate::models::CrawlStatus;
    use crate::repository::DbContext;
    use crate::scrapers::ApiClient;

    async fn setup_test_app() -> (axum::Router, Arc<JobRunner<FakeFactory>>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = DbContext::from_sqlite_path(&dir.path().join("test.db"));
        db.init_schema().await.unwrap();

        let runner = Arc::new(JobRunner::new(
            catalog::builtin(),
            db,
            FakeFactory::failing(),
            ApiClient::new(Duration::from_secs(5), None).unwrap(),
            Duration::from_secs(5),
            chrono_tz::Asia::Seoul,
        ));
        let app = create_router(AppState::new(runner.clone()));
        (app, runner, dir)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _runner, _dir) = setup_test_app().await;
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_jobs_lists_catalog() {
        let (app, _runner, _dir) = setup_test_app().await;

        let response = app.oneshot(get("/api/jobs")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        let jobs = json.as_array().unwrap();
        assert_eq!(jobs.len(), catalog::builtin().len());
        let youtube = jobs.iter().find(|j| j["id"] == "youtube").unwrap();
        assert_eq!(youtube["kind"], "youtube");
        assert_eq!(youtube["status"]["state"], "idle");
    }

    #[tokio::test]
    async fn test_run_unknown_job_is_404() {
        let (app, _runner, _dir) = setup_test_app().await;

        let response = app.oneshot(get("/api/jobs/nope/run")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = json_body(response).await;
        assert!(json["message"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_run_while_running_is_409() {
        let (app, runner, _dir) = setup_test_app().await;
        let _guard = runner.claim("playboard-viewed").unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/jobs/playboard-viewed/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .oneshot(get("/api/jobs/playboard-viewed/status"))
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json["state"], "running");
    }

    #[tokio::test]
    async fn test_setup_failure_is_500_and_recorded() {
        let (app, _runner, _dir) = setup_test_app().await;

        let response = app
            .clone()
            .oneshot(get("/api/jobs/playboard-viewed/run"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(response).await;
        assert!(json["message"].as_str().unwrap().contains("opening browser"));

        let response = app.oneshot(get("/api/crawl-state")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json[0]["job_id"], "playboard-viewed");
        assert_eq!(json[0]["last_status"], CrawlStatus::Failed.as_str());
        assert_eq!(json[0]["service"], "playboard_co");
    }

    #[tokio::test]
    async fn test_status_unknown_job_is_404() {
        let (app, _runner, _dir) = setup_test_app().await;
        let response = app.oneshot(get("/api/jobs/nope/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
