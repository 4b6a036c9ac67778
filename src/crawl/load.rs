//! Incremental loading of lazily rendered lists.
//!
//! Ranking pages render a first screen of rows and append more on scroll or
//! when a "load more" button is pressed. [`materialize_rows`] keeps poking
//! the page until enough rows exist or the attempt budget runs out.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::scrapers::PageDriver;

/// Which rows count toward the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowQuery {
    pub row_selector: String,
    /// Rows containing this element (ad slots) are not counted.
    #[serde(default)]
    pub exclude_marker: Option<String>,
}

impl RowQuery {
    pub fn new(row_selector: impl Into<String>) -> Self {
        Self {
            row_selector: row_selector.into(),
            exclude_marker: None,
        }
    }

    pub fn excluding(mut self, marker: impl Into<String>) -> Self {
        self.exclude_marker = Some(marker.into());
        self
    }
}

/// Timing knobs for one materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Pause after each scroll before recounting.
    pub settle_delay: Duration,
    /// How long one attempt keeps scrolling without seeing new rows.
    pub progress_timeout: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            progress_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of a single load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    pub before_count: usize,
    pub after_count: usize,
    pub elapsed_ms: u64,
}

impl LoadProgress {
    pub fn made_progress(&self) -> bool {
        self.after_count > self.before_count
    }
}

async fn count_rows<D: PageDriver + ?Sized>(driver: &mut D, rows: &RowQuery) -> Option<usize> {
    match driver
        .count_excluding(&rows.row_selector, rows.exclude_marker.as_deref())
        .await
    {
        Ok(n) => Some(n),
        Err(e) => {
            debug!("Row count failed for {}: {}", rows.row_selector, e);
            None
        }
    }
}

/// Grow the list until `target` rows are present or `max_attempts` attempts
/// have been made. Returns the last observed count, which may fall short.
///
/// Each attempt clicks `trigger` (when given), then scrolls, waits and
/// recounts until the count rises or `progress_timeout` passes. Attempts that
/// hit driver errors simply count as no progress.
pub async fn materialize_rows<D: PageDriver + ?Sized>(
    driver: &mut D,
    trigger: Option<&str>,
    rows: &RowQuery,
    target: usize,
    max_attempts: u32,
    opts: &LoadOptions,
) -> usize {
    let mut count = count_rows(driver, rows).await.unwrap_or(0);

    for attempt in 1..=max_attempts {
        if count >= target {
            break;
        }

        let started = Instant::now();
        let before = count;

        if let Some(trigger) = trigger {
            match driver.query_first(trigger).await {
                Ok(Some(button)) => {
                    if let Err(e) = driver.click(&button).await {
                        debug!("Load trigger {} click failed: {}", trigger, e);
                    }
                }
                Ok(None) => debug!("Load trigger {} not present", trigger),
                Err(e) => debug!("Load trigger {} lookup failed: {}", trigger, e),
            }
        }

        loop {
            if let Err(e) = driver.scroll_to_bottom().await {
                debug!("Scroll failed: {}", e);
            }
            if !opts.settle_delay.is_zero() {
                tokio::time::sleep(opts.settle_delay).await;
            }
            if let Some(n) = count_rows(driver, rows).await {
                count = n;
            }
            if count > before || started.elapsed() >= opts.progress_timeout {
                break;
            }
        }

        let progress = LoadProgress {
            before_count: before,
            after_count: count,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        trace!(
            attempt,
            before = progress.before_count,
            after = progress.after_count,
            elapsed_ms = progress.elapsed_ms,
            progressed = progress.made_progress(),
            "load attempt"
        );
    }

    debug!("Materialized {} of {} rows", count, target);
    count
}
