//! Crawl error taxonomy.

use thiserror::Error;

use crate::repository::StoreError;
use crate::scrapers::{ApiError, DriverError};

/// Why a single work unit failed.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("no rows found: {0}")]
    EmptyList(String),

    #[error(transparent)]
    Driver(DriverError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("{0}")]
    Fatal(String),
}

impl UnitError {
    /// Worth a backoff and another attempt at the same unit.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::EmptyList(_) => true,
            Self::Driver(e) => !matches!(e, DriverError::Closed | DriverError::Unavailable(_)),
            Self::Api(e) => e.is_recoverable(),
            Self::Persistence(_) | Self::Fatal(_) => false,
        }
    }
}

impl From<DriverError> for UnitError {
    fn from(e: DriverError) -> Self {
        if e.is_rate_limit() {
            Self::RateLimited(e.to_string())
        } else {
            Self::Driver(e)
        }
    }
}

/// Errors that abort a whole crawl.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Login, category discovery or other preparation failed.
    #[error("setup failed: {0:#}")]
    Setup(anyhow::Error),
}

impl CrawlError {
    pub fn setup(message: impl std::fmt::Display) -> Self {
        Self::Setup(anyhow::anyhow!("{}", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_page_becomes_rate_limit() {
        let err = UnitError::from(DriverError::Blocked {
            url: "https://playboard.co/en".into(),
            status: 429,
        });
        assert!(matches!(err, UnitError::RateLimited(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_closed_session_is_terminal() {
        assert!(!UnitError::from(DriverError::Closed).is_recoverable());
        assert!(UnitError::from(DriverError::NotFound(".sheet".into())).is_recoverable());
    }

    #[test]
    fn test_store_errors_are_terminal() {
        let err = UnitError::from(StoreError::Invalid("empty channel id".into()));
        assert!(!err.is_recoverable());
    }
}
