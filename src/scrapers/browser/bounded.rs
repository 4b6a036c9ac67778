//! Driver wrapper that puts a deadline on every call.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::driver::{DriverError, NavigationOutcome, PageDriver, WaitPolicy};

/// Wraps a driver so no single operation can suspend longer than `limit`.
pub struct BoundedDriver<D> {
    inner: D,
    limit: Duration,
}

impl<D: PageDriver> BoundedDriver<D> {
    pub fn new(inner: D, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

async fn bounded<T, F>(limit: Duration, op: &str, fut: F) -> Result<T, DriverError>
where
    F: Future<Output = Result<T, DriverError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout(limit, op.to_string())),
    }
}

#[async_trait]
impl<D: PageDriver> PageDriver for BoundedDriver<D> {
    type Element = D::Element;

    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitPolicy,
    ) -> Result<NavigationOutcome, DriverError> {
        bounded(self.limit, "navigate", self.inner.navigate(url, wait)).await
    }

    async fn current_url(&mut self) -> Result<String, DriverError> {
        bounded(self.limit, "current_url", self.inner.current_url()).await
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<Self::Element>, DriverError> {
        bounded(self.limit, "query_all", self.inner.query_all(selector)).await
    }

    async fn query_within(
        &mut self,
        parent: &Self::Element,
        selector: &str,
    ) -> Result<Option<Self::Element>, DriverError> {
        bounded(
            self.limit,
            "query_within",
            self.inner.query_within(parent, selector),
        )
        .await
    }

    async fn query_all_within(
        &mut self,
        parent: &Self::Element,
        selector: &str,
    ) -> Result<Vec<Self::Element>, DriverError> {
        bounded(
            self.limit,
            "query_all_within",
            self.inner.query_all_within(parent, selector),
        )
        .await
    }

    async fn text(&mut self, element: &Self::Element) -> Result<Option<String>, DriverError> {
        bounded(self.limit, "text", self.inner.text(element)).await
    }

    async fn attribute(
        &mut self,
        element: &Self::Element,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        bounded(self.limit, "attribute", self.inner.attribute(element, name)).await
    }

    async fn click(&mut self, element: &Self::Element) -> Result<(), DriverError> {
        bounded(self.limit, "click", self.inner.click(element)).await
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), DriverError> {
        bounded(self.limit, "type_text", self.inner.type_text(selector, text)).await
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), DriverError> {
        bounded(self.limit, "scroll", self.inner.scroll_to_bottom()).await
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        // The caller's own timeout wins when it is longer.
        let limit = self.limit.max(timeout + Duration::from_secs(1));
        bounded(limit, "wait_for", self.inner.wait_for(selector, timeout)).await
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        bounded(self.limit, "close", self.inner.close()).await
    }

    async fn count_excluding(
        &mut self,
        selector: &str,
        exclude: Option<&str>,
    ) -> Result<usize, DriverError> {
        bounded(
            self.limit,
            "count",
            self.inner.count_excluding(selector, exclude),
        )
        .await
    }
}
