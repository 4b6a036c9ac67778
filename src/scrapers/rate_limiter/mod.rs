//! Adaptive per-host rate limiter for API jobs.
//!
//! Spaces requests to each host and adapts the spacing to responses:
//! backs off on 429/503 (or a burst of 403s), recovers slowly on success.

mod config;
mod domain_state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

pub use config::{DomainStats, RateLimitConfig};
use domain_state::DomainState;

/// Shared, cloneable limiter keyed by host.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    domains: Arc<RwLock<HashMap<String, DomainState>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            domains: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn extract_domain(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|s| s.to_string()))
    }

    /// Wait until the host is ready, then record the request.
    pub async fn acquire(&self, url: &str) -> Option<String> {
        let domain = Self::extract_domain(url)?;

        let wait_time = {
            let domains = self.domains.read().await;
            domains
                .get(&domain)
                .map(|s| s.time_until_ready())
                .unwrap_or(Duration::ZERO)
        };

        if wait_time > Duration::ZERO {
            debug!("Rate limiting {}: waiting {:?}", domain, wait_time);
            tokio::time::sleep(wait_time).await;
        }

        let mut domains = self.domains.write().await;
        let state = domains
            .entry(domain.clone())
            .or_insert_with(|| DomainState::new(self.config.base_delay));
        state.last_request = Some(Instant::now());
        state.total_requests += 1;

        Some(domain)
    }

    pub async fn report_success(&self, domain: &str) {
        let mut domains = self.domains.write().await;
        let Some(state) = domains.get_mut(domain) else {
            return;
        };
        state.consecutive_successes += 1;
        state.clear_403_tracking();

        if state.in_backoff && state.consecutive_successes >= self.config.recovery_threshold {
            state.scale_delay(
                self.config.recovery_multiplier,
                self.config.min_delay,
                self.config.max_delay,
            );
            if state.current_delay <= self.config.base_delay {
                state.in_backoff = false;
                state.current_delay = self.config.base_delay;
                info!("{} recovered from rate limit backoff", domain);
            }
            state.consecutive_successes = 0;
        }
    }

    /// 429 and 503 are throttling; 403 only when it repeats across URLs.
    pub fn is_definite_rate_limit(status_code: u16) -> bool {
        matches!(status_code, 429 | 503)
    }

    /// Record a 403. Returns true when it looks like throttling rather than denial.
    pub async fn report_403(&self, domain: &str, url: &str, has_retry_after: bool) -> bool {
        let mut domains = self.domains.write().await;
        let Some(state) = domains.get_mut(domain) else {
            return has_retry_after;
        };
        state.consecutive_successes = 0;
        let pattern = state.add_403(url);

        if has_retry_after || pattern {
            let unique = state.unique_403_count();
            state.rate_limit_hits += 1;
            state.in_backoff = true;
            state.clear_403_tracking();
            state.scale_delay(
                self.config.backoff_multiplier,
                self.config.min_delay,
                self.config.max_delay,
            );
            warn!(
                "Rate limited by {} ({} URLs got 403), backing off to {:?}",
                domain, unique, state.current_delay
            );
            return true;
        }

        debug!("403 from {} for {} treated as access denied", domain, url);
        false
    }

    pub async fn report_rate_limit(&self, domain: &str, status_code: u16) {
        let mut domains = self.domains.write().await;
        let Some(state) = domains.get_mut(domain) else {
            return;
        };
        state.rate_limit_hits += 1;
        state.consecutive_successes = 0;
        state.clear_403_tracking();
        state.in_backoff = true;
        state.scale_delay(
            self.config.backoff_multiplier,
            self.config.min_delay,
            self.config.max_delay,
        );

        warn!(
            "Rate limited by {} (HTTP {}), backing off to {:?}",
            domain, status_code, state.current_delay
        );
    }

    pub async fn get_stats(&self) -> HashMap<String, DomainStats> {
        let domains = self.domains.read().await;
        domains
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    DomainStats {
                        current_delay: v.current_delay,
                        in_backoff: v.in_backoff,
                        total_requests: v.total_requests,
                        rate_limit_hits: v.rate_limit_hits,
                    },
                )
            })
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
