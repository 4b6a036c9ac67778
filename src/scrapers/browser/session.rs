//! Owned browser session that is released on every exit path.

use tracing::{debug, warn};

use super::driver::{DriverError, PageDriver};

/// Holds a driver until [`BrowserSession::close`] is awaited.
///
/// A session dropped while still open (a panicking job, a cancelled request
/// future) closes its driver on a background task.
pub struct BrowserSession<D: PageDriver + 'static> {
    label: String,
    driver: Option<D>,
}

impl<D: PageDriver + 'static> BrowserSession<D> {
    pub fn new(label: impl Into<String>, driver: D) -> Self {
        Self {
            label: label.into(),
            driver: Some(driver),
        }
    }

    pub fn driver(&mut self) -> Result<&mut D, DriverError> {
        self.driver.as_mut().ok_or(DriverError::Closed)
    }

    pub fn is_open(&self) -> bool {
        self.driver.is_some()
    }

    pub async fn close(mut self) -> Result<(), DriverError> {
        match self.driver.take() {
            Some(mut driver) => driver.close().await,
            None => Ok(()),
        }
    }
}

impl<D: PageDriver + 'static> Drop for BrowserSession<D> {
    fn drop(&mut self) {
        let Some(mut driver) = self.driver.take() else {
            return;
        };
        let label = std::mem::take(&mut self.label);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("{}: browser session abandoned, closing it in the background", label);
                handle.spawn(async move {
                    if let Err(e) = driver.close().await {
                        debug!("{}: background close failed: {}", label, e);
                    }
                });
            }
            Err(_) => warn!("{}: browser session dropped outside a runtime", label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::{FakeFactory, FakeSite};
    use crate::scrapers::{DriverFactory, SessionOptions};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn test_close_releases_once() {
        let factory = FakeFactory::new(FakeSite::default);
        let site = factory.open(&SessionOptions::default()).await.unwrap();
        let mut session = BrowserSession::new("viewership", site);
        assert!(session.is_open());
        assert!(session.driver().is_ok());

        session.close().await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abandoned_session_is_closed_in_background() {
        let factory = FakeFactory::new(FakeSite::default);
        let site = factory.open(&SessionOptions::default()).await.unwrap();
        let session = BrowserSession::new("viewership", site);

        drop(session);
        for _ in 0..10 {
            if factory.closed.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_crawl_still_closes_browser() {
        let factory = FakeFactory::new(FakeSite::default);
        let site = factory.open(&SessionOptions::default()).await.unwrap();

        let task = tokio::spawn(async move {
            let mut session = BrowserSession::new("viewership", site);
            let _driver = session.driver().unwrap();
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        for _ in 0..10 {
            if factory.closed.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    }
}
