//! Per-host limiter state.

use std::time::{Duration, Instant};

use super::config::{RATE_LIMIT_403_THRESHOLD, RATE_LIMIT_WINDOW};

/// State for a single domain.
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Current delay for this domain.
    pub current_delay: Duration,
    /// Last request time.
    pub last_request: Option<Instant>,
    /// Consecutive successes since last rate limit.
    pub consecutive_successes: u32,
    /// Recent 403s as (when, url); several distinct URLs in the window means throttling.
    pub recent_403s: Vec<(Instant, String)>,
    /// Whether currently in backoff.
    pub in_backoff: bool,
    /// Total requests made.
    pub total_requests: u64,
    /// Total rate limit hits.
    pub rate_limit_hits: u64,
}

impl DomainState {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            current_delay: base_delay,
            last_request: None,
            consecutive_successes: 0,
            recent_403s: Vec::new(),
            in_backoff: false,
            total_requests: 0,
            rate_limit_hits: 0,
        }
    }

    /// Add a 403 response, returns true if this triggers rate limit detection.
    pub fn add_403(&mut self, url: &str) -> bool {
        let now = Instant::now();
        let cutoff = now - RATE_LIMIT_WINDOW;

        // Entries are appended in time order.
        let stale = self.recent_403s.partition_point(|(time, _)| *time < cutoff);
        self.recent_403s.drain(..stale);
        self.recent_403s.push((now, url.to_string()));

        self.unique_403_count() >= RATE_LIMIT_403_THRESHOLD
    }

    /// Count unique URLs that received 403 in the current window.
    pub fn unique_403_count(&self) -> usize {
        let mut unique_urls: Vec<&str> = self.recent_403s.iter().map(|(_, u)| u.as_str()).collect();
        unique_urls.sort();
        unique_urls.dedup();
        unique_urls.len()
    }

    /// Clear 403 tracking (on success or confirmed rate limit).
    pub fn clear_403_tracking(&mut self) {
        self.recent_403s.clear();
    }

    /// Time until this host may be hit again.
    pub fn time_until_ready(&self) -> Duration {
        self.last_request
            .map(|last| self.current_delay.saturating_sub(last.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    /// Multiply the delay, clamped to `[min, max]`.
    pub fn scale_delay(&mut self, factor: f64, min: Duration, max: Duration) {
        let scaled = Duration::from_secs_f64(self.current_delay.as_secs_f64() * factor);
        self.current_delay = scaled.clamp(min, max);
    }
}
