//! Diesel-based repository for per-job crawl state.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::CrawlStateRecord;
use super::pool::{AsyncSqlitePool, DieselError};
use super::util::parse_datetime;
use crate::models::{CrawlStatus, Service, ServiceCrawlState};
use crate::schema::service_crawl_state;

impl From<CrawlStateRecord> for ServiceCrawlState {
    fn from(record: CrawlStateRecord) -> Self {
        ServiceCrawlState {
            job_id: record.job_id,
            service: Service::from_str(&record.service).unwrap_or(Service::PlayboardCo),
            last_crawled_at: parse_datetime(&record.last_crawled_at),
            last_status: CrawlStatus::from_str(&record.last_status)
                .unwrap_or(CrawlStatus::Failed),
            last_error: record.last_error,
            last_cursor: record.last_cursor,
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Crawl state repository.
#[derive(Clone)]
pub struct DieselCrawlStateRepository {
    pool: AsyncSqlitePool,
}

impl DieselCrawlStateRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Stamp the start of a run. Keeps any stored resume cursor.
    pub async fn touch(&self, job_id: &str, service: Service) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        diesel::insert_into(service_crawl_state::table)
            .values((
                service_crawl_state::job_id.eq(job_id),
                service_crawl_state::service.eq(service.as_str()),
                service_crawl_state::last_crawled_at.eq(&now),
                service_crawl_state::last_status.eq(CrawlStatus::Running.as_str()),
                service_crawl_state::last_error.eq(None::<String>),
                service_crawl_state::last_cursor.eq(None::<String>),
                service_crawl_state::updated_at.eq(&now),
            ))
            .on_conflict(service_crawl_state::job_id)
            .do_update()
            .set((
                service_crawl_state::service.eq(service.as_str()),
                service_crawl_state::last_crawled_at.eq(&now),
                service_crawl_state::last_status.eq(CrawlStatus::Running.as_str()),
                service_crawl_state::last_error.eq(None::<String>),
                service_crawl_state::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Record how a run ended. A `None` cursor leaves the stored hint alone.
    pub async fn finish(
        &self,
        job_id: &str,
        status: CrawlStatus,
        error: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        let target = service_crawl_state::table.find(job_id);
        match cursor {
            Some(cursor) => {
                diesel::update(target)
                    .set((
                        service_crawl_state::last_status.eq(status.as_str()),
                        service_crawl_state::last_error.eq(error),
                        service_crawl_state::last_cursor.eq(Some(cursor)),
                        service_crawl_state::updated_at.eq(&now),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
            None => {
                diesel::update(target)
                    .set((
                        service_crawl_state::last_status.eq(status.as_str()),
                        service_crawl_state::last_error.eq(error),
                        service_crawl_state::updated_at.eq(&now),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
        }

        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<ServiceCrawlState>, DieselError> {
        let mut conn = self.pool.get().await?;

        service_crawl_state::table
            .find(job_id)
            .first::<CrawlStateRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(ServiceCrawlState::from))
    }

    pub async fn get_all(&self) -> Result<Vec<ServiceCrawlState>, DieselError> {
        let mut conn = self.pool.get().await?;

        service_crawl_state::table
            .order(service_crawl_state::job_id.asc())
            .load::<CrawlStateRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(ServiceCrawlState::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DbContext;
    use tempfile::tempdir;

    async fn setup_test_db() -> (DieselCrawlStateRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_sqlite_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        (ctx.crawl_state(), dir)
    }

    #[tokio::test]
    async fn test_touch_then_finish() {
        let (repo, _dir) = setup_test_db().await;

        repo.touch("playboard-super-chatted", Service::PlayboardCo)
            .await
            .unwrap();
        let state = repo.get("playboard-super-chatted").await.unwrap().unwrap();
        assert_eq!(state.last_status, CrawlStatus::Running);
        assert_eq!(state.service, Service::PlayboardCo);

        repo.finish(
            "playboard-super-chatted",
            CrawlStatus::Partial,
            Some("1 unit failed"),
            Some("2025-03-05"),
        )
        .await
        .unwrap();

        let state = repo.get("playboard-super-chatted").await.unwrap().unwrap();
        assert_eq!(state.last_status, CrawlStatus::Partial);
        assert_eq!(state.last_error.as_deref(), Some("1 unit failed"));
        assert_eq!(state.last_cursor.as_deref(), Some("2025-03-05"));
    }

    #[tokio::test]
    async fn test_touch_keeps_cursor_and_clears_error() {
        let (repo, _dir) = setup_test_db().await;

        repo.touch("job", Service::Viewership).await.unwrap();
        repo.finish("job", CrawlStatus::Failed, Some("boom"), Some("7"))
            .await
            .unwrap();
        repo.touch("job", Service::Viewership).await.unwrap();

        let state = repo.get("job").await.unwrap().unwrap();
        assert_eq!(state.last_status, CrawlStatus::Running);
        assert_eq!(state.last_error, None);
        assert_eq!(state.last_cursor.as_deref(), Some("7"));
        assert_eq!(repo.get_all().await.unwrap().len(), 1);
    }
}
