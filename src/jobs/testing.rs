//! In-memory page driver and JSON source for job tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::scrapers::{
    ApiError, DriverError, DriverFactory, JsonFetch, NavigationOutcome, PageDriver,
    SessionOptions, WaitPolicy,
};

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub text: Option<String>,
    pub attrs: HashMap<String, String>,
    pub children: HashMap<String, Vec<usize>>,
    /// Clicking navigates here.
    pub link: Option<String>,
}

impl Node {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child(mut self, selector: &str, id: usize) -> Self {
        self.children
            .entry(selector.to_string())
            .or_default()
            .push(id);
        self
    }

    pub fn link(mut self, url: &str) -> Self {
        self.link = Some(url.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub status: u16,
    pub roots: HashMap<String, Vec<usize>>,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            status: 200,
            roots: HashMap::new(),
        }
    }
}

impl Page {
    pub fn with(mut self, selector: &str, ids: Vec<usize>) -> Self {
        self.roots.entry(selector.to_string()).or_default().extend(ids);
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

/// A set of pages addressed by exact URL.
#[derive(Debug, Default)]
pub struct FakeSite {
    nodes: Vec<Node>,
    pages: HashMap<String, Page>,
    current: String,
    pub visits: Vec<String>,
    pub typed: Vec<(String, String)>,
    pub clicks: usize,
    pub closed: bool,
    /// Navigations allowed before the session reports itself closed.
    pub navigation_limit: Option<usize>,
    close_count: Option<Arc<AtomicUsize>>,
}

impl FakeSite {
    pub fn add(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn page(&mut self, url: &str, page: Page) {
        self.pages.insert(url.to_string(), page);
    }

    fn roots(&self, selector: &str) -> Vec<usize> {
        self.pages
            .get(&self.current)
            .and_then(|p| p.roots.get(selector))
            .cloned()
            .unwrap_or_default()
    }

    fn go(&mut self, url: &str) -> NavigationOutcome {
        self.visits.push(url.to_string());
        self.current = url.to_string();
        let status = self.pages.get(url).map(|p| p.status).unwrap_or(404);
        NavigationOutcome {
            status: Some(status),
            final_url: url.to_string(),
        }
    }
}

#[async_trait]
impl PageDriver for FakeSite {
    type Element = usize;

    async fn navigate(
        &mut self,
        url: &str,
        _wait: WaitPolicy,
    ) -> Result<NavigationOutcome, DriverError> {
        if self.navigation_limit.is_some_and(|limit| self.visits.len() >= limit) {
            return Err(DriverError::Closed);
        }
        Ok(self.go(url))
    }

    async fn current_url(&mut self) -> Result<String, DriverError> {
        Ok(self.current.clone())
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<usize>, DriverError> {
        Ok(self.roots(selector))
    }

    async fn query_within(
        &mut self,
        parent: &usize,
        selector: &str,
    ) -> Result<Option<usize>, DriverError> {
        Ok(self.query_all_within(parent, selector).await?.into_iter().next())
    }

    async fn query_all_within(
        &mut self,
        parent: &usize,
        selector: &str,
    ) -> Result<Vec<usize>, DriverError> {
        Ok(self
            .nodes
            .get(*parent)
            .and_then(|n| n.children.get(selector))
            .cloned()
            .unwrap_or_default())
    }

    async fn text(&mut self, element: &usize) -> Result<Option<String>, DriverError> {
        Ok(self.nodes.get(*element).and_then(|n| n.text.clone()))
    }

    async fn attribute(&mut self, element: &usize, name: &str) -> Result<Option<String>, DriverError> {
        Ok(self
            .nodes
            .get(*element)
            .and_then(|n| n.attrs.get(name).cloned()))
    }

    async fn click(&mut self, element: &usize) -> Result<(), DriverError> {
        self.clicks += 1;
        if let Some(url) = self.nodes.get(*element).and_then(|n| n.link.clone()) {
            self.go(&url);
        }
        Ok(())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), DriverError> {
        if self.roots(selector).is_empty() {
            return Err(DriverError::NotFound(selector.to_string()));
        }
        self.typed.push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        if self.roots(selector).is_empty() {
            Err(DriverError::Timeout(timeout, format!("wait_for {}", selector)))
        } else {
            Ok(())
        }
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.closed = true;
        if let Some(count) = &self.close_count {
            count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Opens a fresh copy of the same site for every session.
pub struct FakeFactory {
    build: fn() -> FakeSite,
    pub fail: bool,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    pub sessions: Mutex<Vec<SessionOptions>>,
}

impl FakeFactory {
    pub fn new(build: fn() -> FakeSite) -> Self {
        Self {
            build,
            fail: false,
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(FakeSite::default)
        }
    }
}

#[async_trait]
impl DriverFactory for FakeFactory {
    type Driver = FakeSite;

    async fn open(&self, options: &SessionOptions) -> Result<FakeSite, DriverError> {
        if self.fail {
            return Err(DriverError::Unavailable("no browser in tests".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().push(options.clone());
        let mut site = (self.build)();
        site.close_count = Some(self.closed.clone());
        Ok(site)
    }
}

/// Canned JSON responses keyed by URL plus the `id` query parameter, if any.
#[derive(Debug, Default)]
pub struct FakeApi {
    responses: HashMap<String, Result<Value, u16>>,
    pub requests: Mutex<Vec<String>>,
}

impl FakeApi {
    fn key(url: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}#{}", url, id),
            None => url.to_string(),
        }
    }

    pub fn respond(&mut self, url: &str, body: Value) {
        self.responses.insert(Self::key(url, None), Ok(body));
    }

    pub fn respond_for(&mut self, url: &str, id: &str, body: Value) {
        self.responses.insert(Self::key(url, Some(id)), Ok(body));
    }

    pub fn fail(&mut self, url: &str, status: u16) {
        self.responses.insert(Self::key(url, None), Err(status));
    }
}

#[async_trait]
impl JsonFetch for FakeApi {
    async fn get_json(
        &self,
        url: &str,
        params: &[(&str, String)],
        _headers: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        let id = params
            .iter()
            .find(|(k, _)| *k == "id" || *k == "videoCategoryId")
            .map(|(_, v)| v.as_str());
        self.requests.lock().unwrap().push(Self::key(url, id));

        let response = self
            .responses
            .get(&Self::key(url, id))
            .or_else(|| self.responses.get(url))
            .cloned()
            .unwrap_or(Err(404));
        response.map_err(|status| match status {
            429 | 503 => ApiError::RateLimited {
                status,
                retry_after: None,
            },
            _ => ApiError::Status {
                status,
                url: url.to_string(),
            },
        })
    }
}
