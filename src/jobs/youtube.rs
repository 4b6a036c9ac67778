//! Video-platform crawl through the public data API.
//!
//! Scopes are the platform's top video categories for the region; each scope
//! searches videos in that category and reads statistics for every channel
//! that uploaded one.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::extract::{json_integer, json_string};
use crate::crawl::{
    CrawlError, CrawlJob, CursorPlan, DateSpec, Scope, UnitError, UnitRows, WorkUnit,
};
use crate::models::{ChannelSnapshot, Service};
use crate::repository::SnapshotStore;
use crate::scrapers::{ApiError, JsonFetch};

/// The channels endpoint accepts at most this many ids per call.
const CHANNEL_BATCH: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YoutubeJobConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_region")]
    pub region_code: String,
    #[serde(default = "default_hl")]
    pub hl: String,
    #[serde(default = "default_category_limit")]
    pub category_limit: usize,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default = "default_row_date")]
    pub row_date: DateSpec,
}

fn default_api_base() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_api_key_env() -> String {
    "YOUTUBE_API_KEY".to_string()
}

fn default_region() -> String {
    "KR".to_string()
}

fn default_hl() -> String {
    "ko_KR".to_string()
}

fn default_category_limit() -> usize {
    5
}

fn default_max_results() -> u32 {
    100
}

fn default_row_date() -> DateSpec {
    DateSpec::Today
}

impl Default for YoutubeJobConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            region_code: default_region(),
            hl: default_hl(),
            category_limit: default_category_limit(),
            max_results: default_max_results(),
            row_date: default_row_date(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct YoutubeJob {
    id: String,
    config: YoutubeJobConfig,
    today: NaiveDate,
}

impl YoutubeJob {
    pub fn new(id: &str, config: YoutubeJobConfig, today: NaiveDate) -> Self {
        Self {
            id: id.to_string(),
            config,
            today,
        }
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), name)
    }

    fn items(body: &Value) -> Result<&Vec<Value>, ApiError> {
        body.get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| ApiError::Decode("response has no items".to_string()))
    }

    /// Unique uploader ids of the category's search results, in result order.
    async fn channel_ids<C: JsonFetch + ?Sized>(
        &self,
        api: &C,
        key: &str,
        category_id: &str,
    ) -> Result<Vec<String>, ApiError> {
        let params = [
            ("part", "snippet".to_string()),
            ("type", "video".to_string()),
            ("videoCategoryId", category_id.to_string()),
            ("regionCode", self.config.region_code.clone()),
            ("maxResults", self.config.max_results.to_string()),
            ("key", key.to_string()),
        ];
        let body = api.get_json(&self.endpoint("search"), &params, &[]).await?;

        let mut ids: Vec<String> = Vec::new();
        for item in Self::items(&body)? {
            if let Some(id) = json_string(item, "/snippet/channelId") {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl<C: JsonFetch> CrawlJob<C> for YoutubeJob {
    type Row = Value;

    fn id(&self) -> &str {
        &self.id
    }

    fn plan(&self) -> CursorPlan {
        CursorPlan::Once
    }

    async fn prepare(&self, api: &mut C) -> Result<Vec<Scope>, CrawlError> {
        let key = self
            .api_key()
            .ok_or_else(|| CrawlError::setup(format!("{} is not set", self.config.api_key_env)))?;

        let params = [
            ("part", "snippet".to_string()),
            ("regionCode", self.config.region_code.clone()),
            ("hl", self.config.hl.clone()),
            ("key", key),
        ];
        let body = api
            .get_json(&self.endpoint("videoCategories"), &params, &[])
            .await
            .map_err(|e| CrawlError::setup(format!("listing categories: {}", e)))?;

        let scopes: Vec<Scope> = Self::items(&body)
            .map_err(CrawlError::setup)?
            .iter()
            .take(self.config.category_limit)
            .enumerate()
            .filter_map(|(index, item)| {
                let id = json_string(item, "/id")?;
                let name = json_string(item, "/snippet/title").unwrap_or_else(|| id.clone());
                Some(Scope::new(name, index).with_key(id))
            })
            .collect();

        if scopes.is_empty() {
            return Err(CrawlError::setup("no video categories returned"));
        }
        info!(
            "{}: categories {}",
            self.id,
            scopes
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(scopes)
    }

    async fn fetch_unit(
        &self,
        api: &mut C,
        _store: &dyn SnapshotStore,
        unit: &WorkUnit,
    ) -> Result<UnitRows<Value>, UnitError> {
        let key = self
            .api_key()
            .ok_or_else(|| UnitError::Fatal(format!("{} is not set", self.config.api_key_env)))?;
        let category_id = unit
            .scope
            .as_ref()
            .and_then(|s| s.key.clone())
            .ok_or_else(|| UnitError::Fatal(format!("unit {} has no category", unit)))?;

        let ids = self.channel_ids(&*api, &key, &category_id).await?;
        debug!("{}: {} channels in category {}", self.id, ids.len(), category_id);

        let mut rows = Vec::with_capacity(ids.len());
        for batch in ids.chunks(CHANNEL_BATCH) {
            let params = [
                ("part", "statistics,snippet".to_string()),
                ("id", batch.join(",")),
                ("key", key.clone()),
            ];
            let body = api
                .get_json(&self.endpoint("channels"), &params, &[])
                .await?;
            // Channels that were removed are simply missing from the response.
            if let Some(items) = body.get("items").and_then(Value::as_array) {
                rows.extend(items.iter().cloned());
            }
        }

        Ok(UnitRows::new(rows))
    }

    fn map_row(&self, row: Value, unit: &WorkUnit) -> Option<ChannelSnapshot> {
        let channel_id = json_string(&row, "/id")?;
        let mut snapshot = ChannelSnapshot::new(
            channel_id,
            Service::Youtube,
            Some(self.config.row_date.resolve(self.today)),
        );
        for (metric, pointer) in [
            ("cumulativeViews", "/statistics/viewCount"),
            ("cumulativeSubscribers", "/statistics/subscriberCount"),
            ("numberOfUploadedVideos", "/statistics/videoCount"),
        ] {
            snapshot
                .metrics
                .insert(metric.to_string(), json_integer(&row, pointer).unwrap_or(0).into());
        }
        snapshot.display.name = json_string(&row, "/snippet/title");
        snapshot.display.icon_url = json_string(&row, "/snippet/thumbnails/default/url");
        snapshot.display.category = unit.scope.as_ref().map(|s| s.name.clone());
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::{run_crawl, CrawlPolicy, UnitState};
    use crate::jobs::testing::FakeApi;
    use crate::models::MetricValue;
    use crate::repository::DbContext;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    const BASE: &str = "https://api.test/v3";

    fn config(key_env: &str) -> YoutubeJobConfig {
        YoutubeJobConfig {
            api_base: BASE.into(),
            api_key_env: key_env.into(),
            category_limit: 2,
            ..YoutubeJobConfig::default()
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 21).unwrap()
    }

    fn channel(id: &str, title: &str, views: &str) -> Value {
        json!({
            "id": id,
            "snippet": {
                "title": title,
                "thumbnails": {"default": {"url": format!("https://img.test/{}.jpg", id)}}
            },
            "statistics": {"viewCount": views, "subscriberCount": "12", "videoCount": "3"}
        })
    }

    fn api() -> FakeApi {
        let mut api = FakeApi::default();
        api.respond(
            &format!("{}/videoCategories", BASE),
            json!({"items": [
                {"id": "10", "snippet": {"title": "Music"}},
                {"id": "20", "snippet": {"title": "Gaming"}},
                {"id": "22", "snippet": {"title": "People"}}
            ]}),
        );
        api.respond_for(
            &format!("{}/search", BASE),
            "10",
            json!({"items": [
                {"snippet": {"channelId": "UCa"}},
                {"snippet": {"channelId": "UCb"}},
                {"snippet": {"channelId": "UCa"}}
            ]}),
        );
        api.respond_for(
            &format!("{}/search", BASE),
            "20",
            json!({"items": [{"snippet": {"channelId": "UCc"}}]}),
        );
        api.respond_for(
            &format!("{}/channels", BASE),
            "UCa,UCb",
            json!({"items": [channel("UCa", "Alpha", "1000"), channel("UCb", "Beta", "2000")]}),
        );
        api.respond_for(
            &format!("{}/channels", BASE),
            "UCc",
            json!({"items": [channel("UCc", "Gamma", "3000")]}),
        );
        api
    }

    #[tokio::test]
    async fn test_crawls_top_categories() {
        std::env::set_var("CHANSTATS_TEST_YT_KEY", "secret");
        let job = YoutubeJob::new("youtube", config("CHANSTATS_TEST_YT_KEY"), today());
        let mut api = api();
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_sqlite_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let store = ctx.snapshots();

        let policy = CrawlPolicy {
            backoff: Duration::ZERO,
            ..CrawlPolicy::default()
        };
        let report = run_crawl(&job, &mut api, &store, &policy).await.unwrap();

        assert_eq!(report.units.len(), 2);
        assert!(report.units.iter().all(|u| u.state == UnitState::Completed));
        assert_eq!(report.rows_persisted, 3);

        let rows = store.list(Service::Youtube, Some(today()), 10).await.unwrap();
        let beta = rows.iter().find(|r| r.channel_id == "UCb").unwrap();
        assert_eq!(beta.metric("cumulativeViews"), Some(MetricValue::Int(2000)));
        assert_eq!(beta.display.category.as_deref(), Some("Music"));
        assert_eq!(beta.display.icon_url.as_deref(), Some("https://img.test/UCb.jpg"));

        // duplicate uploaders are looked up once
        let requests = api.requests.lock().unwrap();
        assert!(requests.contains(&format!("{}/channels#UCa,UCb", BASE)));
    }

    #[tokio::test]
    async fn test_missing_key_fails_setup() {
        let job = YoutubeJob::new("youtube", config("CHANSTATS_TEST_YT_UNSET"), today());
        let mut api = api();
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_sqlite_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();

        let err = run_crawl(&job, &mut api, &ctx.snapshots(), &CrawlPolicy::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CHANSTATS_TEST_YT_UNSET"));
        assert!(api.requests.lock().unwrap().is_empty());
    }
}
