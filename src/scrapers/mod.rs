//! Fetch layer: browser page drivers and the JSON API client.

pub mod browser;
pub mod http_client;
pub mod rate_limiter;

pub use browser::{
    BoundedDriver, BrowserEngineConfig, BrowserEngineType, BrowserSession, ChromiumDriver,
    ChromiumFactory, CookieSpec, DriverError, DriverFactory, NavigationOutcome, PageDriver,
    SessionOptions, WaitPolicy,
};
pub use http_client::{ApiClient, ApiError, JsonFetch};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
