//! Rate limiter tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Window in which 403s on distinct URLs are correlated.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(30);

/// Distinct URLs answering 403 inside the window before we call it throttling.
pub const RATE_LIMIT_403_THRESHOLD: usize = 3;

/// Tuning for the adaptive limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Starting delay between requests to one host.
    #[serde(with = "millis", default = "default_base_delay")]
    pub base_delay: Duration,
    #[serde(with = "millis", default = "default_min_delay")]
    pub min_delay: Duration,
    #[serde(with = "millis", default = "default_max_delay")]
    pub max_delay: Duration,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_recovery_multiplier")]
    pub recovery_multiplier: f64,
    /// Successes needed before the delay shrinks again.
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            recovery_multiplier: default_recovery_multiplier(),
            recovery_threshold: default_recovery_threshold(),
        }
    }
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_min_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_recovery_multiplier() -> f64 {
    0.8
}

fn default_recovery_threshold() -> u32 {
    5
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Snapshot of one host's limiter state.
#[derive(Debug, Clone, Serialize)]
pub struct DomainStats {
    #[serde(with = "millis")]
    pub current_delay: Duration,
    pub in_backoff: bool,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}
