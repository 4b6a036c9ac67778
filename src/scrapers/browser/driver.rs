//! Page driver abstraction over a single browser tab.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a page driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("element not found: {0}")]
    NotFound(String),

    #[error("timed out after {0:?} during {1}")]
    Timeout(Duration, String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("page was blocked (HTTP {status}) at {url}")]
    Blocked { url: String, status: u16 },

    #[error("browser session closed")]
    Closed,

    #[error("browser unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Whether the error indicates the site is throttling or challenging us.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::Blocked { status, .. } if matches!(status, 403 | 429 | 503))
    }
}

/// How long navigation waits before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Return once the document is interactive.
    DomReady,
    /// Additionally wait for network activity to settle.
    #[default]
    NetworkIdle,
}

/// Result of a navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationOutcome {
    /// HTTP status of the main document, when the driver can observe it.
    pub status: Option<u16>,
    pub final_url: String,
}

/// A single browser tab.
///
/// All calls are sequential; one crawl owns one driver.
#[async_trait]
pub trait PageDriver: Send {
    type Element: Send + Sync;

    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitPolicy,
    ) -> Result<NavigationOutcome, DriverError>;

    async fn current_url(&mut self) -> Result<String, DriverError>;

    async fn query_all(&mut self, selector: &str) -> Result<Vec<Self::Element>, DriverError>;

    async fn query_within(
        &mut self,
        parent: &Self::Element,
        selector: &str,
    ) -> Result<Option<Self::Element>, DriverError>;

    async fn query_all_within(
        &mut self,
        parent: &Self::Element,
        selector: &str,
    ) -> Result<Vec<Self::Element>, DriverError>;

    /// Trimmed value of the element's first text node.
    async fn text(&mut self, element: &Self::Element) -> Result<Option<String>, DriverError>;

    /// DOM property (resolved, e.g. absolute `href`), falling back to the attribute.
    async fn attribute(
        &mut self,
        element: &Self::Element,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    async fn click(&mut self, element: &Self::Element) -> Result<(), DriverError>;

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), DriverError>;

    async fn scroll_to_bottom(&mut self) -> Result<(), DriverError>;

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    async fn close(&mut self) -> Result<(), DriverError>;

    async fn query_first(&mut self, selector: &str) -> Result<Option<Self::Element>, DriverError> {
        Ok(self.query_all(selector).await?.into_iter().next())
    }

    /// Count `selector` matches that do not contain `exclude`.
    async fn count_excluding(
        &mut self,
        selector: &str,
        exclude: Option<&str>,
    ) -> Result<usize, DriverError> {
        let rows = self.query_all(selector).await?;
        let Some(marker) = exclude else {
            return Ok(rows.len());
        };
        let mut count = 0;
        for row in &rows {
            if self.query_within(row, marker).await?.is_none() {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Opens page drivers. One driver per crawl invocation.
#[async_trait]
pub trait DriverFactory: Send + Sync + 'static {
    type Driver: PageDriver + 'static;

    async fn open(&self, options: &SessionOptions) -> Result<Self::Driver, DriverError>;
}

/// Per-job session tweaks layered over the engine config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub user_agent: Option<String>,
    pub cookies: Vec<super::config::CookieSpec>,
}
