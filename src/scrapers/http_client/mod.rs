//! JSON API client with adaptive rate limiting.

mod user_agent;

pub use user_agent::{resolve_user_agent, ANDROID_WEBVIEW_USER_AGENT, USER_AGENT};

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use super::rate_limiter::RateLimiter;

/// Errors from an API request.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limited (HTTP {status}){}", retry_after.map(|d| format!(", retry after {:?}", d)).unwrap_or_default())]
    RateLimited {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Worth retrying after a pause.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Decode(_) => false,
        }
    }
}

/// Quota reasons the video-platform API reports with a 403.
const QUOTA_MARKERS: &[&str] = &["quotaExceeded", "rateLimitExceeded", "userRateLimitExceeded"];

/// HTTP client for the JSON APIs some jobs read from.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    rate_limiter: RateLimiter,
}

impl ApiClient {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> Result<Self, ApiError> {
        Self::with_rate_limiter(timeout, user_agent, RateLimiter::new())
    }

    /// Build a client sharing `rate_limiter` with other clients.
    pub fn with_rate_limiter(
        timeout: Duration,
        user_agent: Option<&str>,
        rate_limiter: RateLimiter,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(resolve_user_agent(user_agent))
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self {
            client,
            rate_limiter,
        })
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// GET `url` with query `params` and extra `headers`, decoding JSON.
    pub async fn get_json(
        &self,
        url: &str,
        params: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<serde_json::Value, ApiError> {
        let domain = self.rate_limiter.acquire(url).await;

        let mut request = self.client.get(url).query(params);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        debug!("GET {}", url);
        let response = request.send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        if status.is_success() {
            if let Some(ref domain) = domain {
                self.rate_limiter.report_success(domain).await;
            }
            let body = response.text().await?;
            return serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()));
        }

        let code = status.as_u16();
        let body = response.text().await.unwrap_or_default();

        if RateLimiter::is_definite_rate_limit(code) {
            if let Some(ref domain) = domain {
                self.rate_limiter.report_rate_limit(domain, code).await;
            }
            return Err(ApiError::RateLimited {
                status: code,
                retry_after,
            });
        }

        if status == StatusCode::FORBIDDEN {
            let quota = QUOTA_MARKERS.iter().any(|m| body.contains(m));
            let throttled = match domain {
                Some(ref domain) => {
                    self.rate_limiter
                        .report_403(domain, url, retry_after.is_some() || quota)
                        .await
                }
                None => quota,
            };
            if throttled {
                return Err(ApiError::RateLimited {
                    status: code,
                    retry_after,
                });
            }
        }

        Err(ApiError::Status {
            status: code,
            url: url.to_string(),
        })
    }
}

/// A source of JSON documents. Jobs fetch through this so tests can stub it.
#[async_trait]
pub trait JsonFetch: Send + Sync {
    async fn get_json(
        &self,
        url: &str,
        params: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<serde_json::Value, ApiError>;
}

#[async_trait]
impl JsonFetch for ApiClient {
    async fn get_json(
        &self,
        url: &str,
        params: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<serde_json::Value, ApiError> {
        ApiClient::get_json(self, url, params, headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ApiError::RateLimited {
            status: 429,
            retry_after: None
        }
        .is_recoverable());
        assert!(ApiError::Status {
            status: 502,
            url: "https://x.test".into()
        }
        .is_recoverable());
        assert!(!ApiError::Status {
            status: 404,
            url: "https://x.test".into()
        }
        .is_recoverable());
        assert!(!ApiError::Decode("eof".into()).is_recoverable());
    }

    #[test]
    fn test_rate_limited_display() {
        let err = ApiError::RateLimited {
            status: 429,
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.to_string(), "rate limited (HTTP 429), retry after 3s");
    }
}
