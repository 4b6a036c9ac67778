//! Chromium page driver over the DevTools protocol.
//!
//! Launches (or connects to) Chrome with stealth flags and exposes one tab
//! through [`PageDriver`].

#[cfg(feature = "browser")]
use std::path::PathBuf;
#[cfg(feature = "browser")]
use std::time::{Duration, Instant};

use async_trait::async_trait;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetUserAgentOverrideParams};
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
#[cfg(feature = "browser")]
use chromiumoxide::element::Element;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tokio::task::JoinHandle;

use super::config::BrowserEngineConfig;
#[cfg(feature = "browser")]
use super::config::BrowserEngineType;
use super::driver::{DriverError, DriverFactory, NavigationOutcome, PageDriver, SessionOptions, WaitPolicy};
#[cfg(feature = "browser")]
use super::stealth::{STEALTH_ARGS, STEALTH_SCRIPTS};

/// Default user agent for browser sessions.
#[cfg(feature = "browser")]
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";

/// Resolves once the document is interactive, or after 10s.
#[cfg(feature = "browser")]
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// Trimmed first text node of `this`, or null.
#[cfg(feature = "browser")]
const FIRST_TEXT_FN: &str = r#"function() {
    const node = this.childNodes[0];
    const value = node && node.nodeValue ? node.nodeValue.trim() : '';
    return value.length > 0 ? value : null;
}"#;

#[cfg(feature = "browser")]
const SCROLL_TO_BOTTOM_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Quiet period after navigation for `WaitPolicy::NetworkIdle`.
#[cfg(feature = "browser")]
const NETWORK_SETTLE: Duration = Duration::from_millis(500);

#[cfg(feature = "browser")]
fn cdp_error(e: impl std::fmt::Display) -> DriverError {
    DriverError::Other(e.to_string())
}

/// Opens Chromium sessions.
#[derive(Debug, Clone)]
pub struct ChromiumFactory {
    config: BrowserEngineConfig,
}

impl ChromiumFactory {
    pub fn new(config: BrowserEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BrowserEngineConfig {
        &self.config
    }
}

#[cfg(feature = "browser")]
impl ChromiumFactory {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    /// Find a Chrome executable: configured path, well-known paths, then PATH.
    fn find_chrome(&self) -> Result<PathBuf, DriverError> {
        if let Some(ref path) = self.config.chrome_bin {
            if path.exists() {
                return Ok(path.clone());
            }
            warn!("Configured chrome_bin {:?} does not exist", path);
        }

        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in [
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(path) = which::which(cmd) {
                info!("Found Chrome in PATH: {}", path.display());
                return Ok(path);
            }
        }

        Err(DriverError::Unavailable(
            "Chrome/Chromium not found; install it or set CHROME_BIN".to_string(),
        ))
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>), DriverError> {
        info!("Launching browser (headless={})", self.config.headless);

        let chrome_path = self.find_chrome()?;
        let (width, height) = self.config.window;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(width, height)
            .request_timeout(Duration::from_secs(self.config.timeout));

        // with_head means NOT headless
        if !self.config.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        for arg in STEALTH_ARGS {
            builder = builder.arg(*arg);
        }
        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| DriverError::Unavailable(format!("invalid browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Unavailable(format!("failed to launch browser: {}", e)))?;

        let task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok((browser, task))
    }

    /// Connect to a remote Chrome instance.
    async fn connect_remote(&self, url: &str) -> Result<(Browser, JoinHandle<()>), DriverError> {
        info!(
            "Connecting to remote browser at {} (timeout: {}s)",
            url, self.config.timeout
        );

        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .map_err(|e| DriverError::Unavailable(format!("remote browser unreachable: {}", e)))?
            .json()
            .await
            .map_err(|e| DriverError::Unavailable(format!("bad /json/version reply: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                DriverError::Unavailable("no webSocketDebuggerUrl in response".to_string())
            })?;

        debug!("Connecting to WebSocket: {}", ws_url);

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(self.config.timeout),
            ..Default::default()
        };

        let (browser, mut handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| DriverError::Unavailable(format!("failed to connect: {}", e)))?;

        let task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok((browser, task))
    }

    async fn prepare_page(&self, page: &Page, options: &SessionOptions) -> Result<(), DriverError> {
        let user_agent = options
            .user_agent
            .clone()
            .or_else(|| self.config.user_agent.clone())
            .unwrap_or_else(|| BROWSER_USER_AGENT.to_string());
        page.execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(cdp_error)?;

        for cookie in &options.cookies {
            let Some(value) = cookie.resolved_value() else {
                warn!("Cookie {} has no value, skipping", cookie.name);
                continue;
            };
            let param = CookieParam::builder()
                .name(cookie.name.clone())
                .value(value)
                .domain(cookie.domain.clone())
                .path(cookie.path.clone())
                .build();
            match param {
                Ok(param) => {
                    if let Err(e) = page.set_cookie(param).await {
                        warn!("Failed to set cookie {}: {}", cookie.name, e);
                    }
                }
                Err(e) => warn!("Failed to build cookie {}: {}", cookie.name, e),
            }
        }

        Ok(())
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl DriverFactory for ChromiumFactory {
    type Driver = ChromiumDriver;

    async fn open(&self, options: &SessionOptions) -> Result<ChromiumDriver, DriverError> {
        let (owned, (mut browser, handler)) = match self.config.remote_url.clone() {
            Some(url) => (false, self.connect_remote(&url).await?),
            None => (true, self.launch().await?),
        };

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                if owned {
                    let _ = browser.close().await;
                }
                handler.abort();
                return Err(DriverError::Unavailable(format!("failed to open tab: {}", e)));
            }
        };

        let mut driver = ChromiumDriver {
            browser,
            page: Some(page),
            handler,
            owned,
            engine: self.config.engine,
            timeout: Duration::from_secs(self.config.timeout),
        };

        let prepared = match driver.page.as_ref() {
            Some(page) => self.prepare_page(page, options).await,
            None => Ok(()),
        };
        if let Err(e) = prepared {
            let _ = driver.close().await;
            return Err(e);
        }

        Ok(driver)
    }
}

/// A Chromium tab.
#[cfg(feature = "browser")]
pub struct ChromiumDriver {
    browser: Browser,
    page: Option<Page>,
    handler: JoinHandle<()>,
    /// Whether we launched the browser (and so must shut it down).
    owned: bool,
    engine: BrowserEngineType,
    timeout: Duration,
}

#[cfg(feature = "browser")]
impl ChromiumDriver {
    fn page(&self) -> Result<&Page, DriverError> {
        self.page.as_ref().ok_or(DriverError::Closed)
    }

    async fn wait_for_ready(&self) {
        let Ok(page) = self.page() else { return };
        match tokio::time::timeout(self.timeout, page.evaluate(WAIT_FOR_READY_SCRIPT)).await {
            Ok(Ok(result)) => {
                let state: String = result.into_value().unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }
    }

    async fn apply_stealth(&self) {
        let Ok(page) = self.page() else { return };
        for script in STEALTH_SCRIPTS {
            if let Err(e) = page.evaluate(*script).await {
                debug!("Stealth script injection skipped: {}", e);
            }
        }
    }
}

/// Stops the CDP handler if the driver goes away without `close`. An owned
/// browser process is killed by chromiumoxide when `Browser` drops.
#[cfg(feature = "browser")]
impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        if self.page.is_some() {
            warn!("Chromium driver dropped without close");
        }
        self.handler.abort();
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl PageDriver for ChromiumDriver {
    type Element = Element;

    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitPolicy,
    ) -> Result<NavigationOutcome, DriverError> {
        debug!("Navigating to {}", url);
        let nav_error = |reason: String| DriverError::Navigation {
            url: url.to_string(),
            reason,
        };

        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(nav_error)?;

        let page = self.page()?;
        let response = page
            .execute(params)
            .await
            .map_err(|e| nav_error(e.to_string()))?;
        if let Some(text) = response.result.error_text.clone() {
            return Err(nav_error(text));
        }

        let status = match page.wait_for_navigation_response().await {
            Ok(Some(request)) => request.response.as_ref().map(|r| r.status as u16),
            Ok(None) => None,
            Err(e) => {
                debug!("No navigation response for {}: {}", url, e);
                None
            }
        };

        self.wait_for_ready().await;
        if wait == WaitPolicy::NetworkIdle {
            tokio::time::sleep(NETWORK_SETTLE).await;
        }
        if self.engine == BrowserEngineType::Stealth {
            self.apply_stealth().await;
        }

        let final_url = self
            .page()?
            .url()
            .await
            .map_err(cdp_error)?
            .unwrap_or_else(|| url.to_string());

        Ok(NavigationOutcome { status, final_url })
    }

    async fn current_url(&mut self) -> Result<String, DriverError> {
        Ok(self
            .page()?
            .url()
            .await
            .map_err(cdp_error)?
            .unwrap_or_default())
    }

    async fn query_all(&mut self, selector: &str) -> Result<Vec<Element>, DriverError> {
        // An absent match is an empty list, not an error.
        match self.page()?.find_elements(selector).await {
            Ok(elements) => Ok(elements),
            Err(e) => {
                debug!("query_all({}) found nothing: {}", selector, e);
                Ok(Vec::new())
            }
        }
    }

    async fn query_within(
        &mut self,
        parent: &Element,
        selector: &str,
    ) -> Result<Option<Element>, DriverError> {
        Ok(self.query_all_within(parent, selector).await?.into_iter().next())
    }

    async fn query_all_within(
        &mut self,
        parent: &Element,
        selector: &str,
    ) -> Result<Vec<Element>, DriverError> {
        match parent.find_elements(selector).await {
            Ok(elements) => Ok(elements),
            Err(e) => {
                debug!("query_all_within({}) found nothing: {}", selector, e);
                Ok(Vec::new())
            }
        }
    }

    async fn text(&mut self, element: &Element) -> Result<Option<String>, DriverError> {
        let returns = element
            .call_js_fn(FIRST_TEXT_FN, false)
            .await
            .map_err(cdp_error)?;
        Ok(returns
            .result
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string())))
    }

    async fn attribute(&mut self, element: &Element, name: &str) -> Result<Option<String>, DriverError> {
        if let Ok(Some(serde_json::Value::String(value))) = element.property(name).await {
            return Ok(Some(value));
        }
        element.attribute(name).await.map_err(cdp_error)
    }

    async fn click(&mut self, element: &Element) -> Result<(), DriverError> {
        element.click().await.map_err(cdp_error)?;
        Ok(())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), DriverError> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .map_err(|_| DriverError::NotFound(selector.to_string()))?;
        element.click().await.map_err(cdp_error)?;
        element.type_str(text).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), DriverError> {
        self.page()?
            .evaluate(SCROLL_TO_BOTTOM_SCRIPT)
            .await
            .map_err(cdp_error)?;
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        let started = Instant::now();
        loop {
            if !self.query_all(selector).await?.is_empty() {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(DriverError::Timeout(timeout, format!("wait_for {}", selector)));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Closing tab failed: {}", e);
            }
        }
        if self.owned {
            if let Err(e) = self.browser.close().await {
                debug!("Closing browser failed: {}", e);
            }
            let _ = self.browser.wait().await;
        }
        self.handler.abort();
        Ok(())
    }

    async fn count_excluding(
        &mut self,
        selector: &str,
        exclude: Option<&str>,
    ) -> Result<usize, DriverError> {
        let selector_js = serde_json::to_string(selector).map_err(cdp_error)?;
        let exclude_js = serde_json::to_string(&exclude).map_err(cdp_error)?;
        let script = format!(
            "(() => {{ const ex = {exclude_js}; return Array.from(document.querySelectorAll({selector_js})).filter(e => !ex || !e.querySelector(ex)).length; }})()"
        );
        let result = self.page()?.evaluate(script).await.map_err(cdp_error)?;
        result.into_value::<usize>().map_err(cdp_error)
    }
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub enum ChromiumDriver {}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl DriverFactory for ChromiumFactory {
    type Driver = ChromiumDriver;

    async fn open(&self, _options: &SessionOptions) -> Result<ChromiumDriver, DriverError> {
        Err(DriverError::Unavailable(
            "browser support not compiled; rebuild with --features browser".to_string(),
        ))
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl PageDriver for ChromiumDriver {
    type Element = std::convert::Infallible;

    async fn navigate(&mut self, _: &str, _: WaitPolicy) -> Result<NavigationOutcome, DriverError> {
        match *self {}
    }
    async fn current_url(&mut self) -> Result<String, DriverError> {
        match *self {}
    }
    async fn query_all(&mut self, _: &str) -> Result<Vec<Self::Element>, DriverError> {
        match *self {}
    }
    async fn query_within(
        &mut self,
        _: &Self::Element,
        _: &str,
    ) -> Result<Option<Self::Element>, DriverError> {
        match *self {}
    }
    async fn query_all_within(
        &mut self,
        _: &Self::Element,
        _: &str,
    ) -> Result<Vec<Self::Element>, DriverError> {
        match *self {}
    }
    async fn text(&mut self, _: &Self::Element) -> Result<Option<String>, DriverError> {
        match *self {}
    }
    async fn attribute(&mut self, _: &Self::Element, _: &str) -> Result<Option<String>, DriverError> {
        match *self {}
    }
    async fn click(&mut self, _: &Self::Element) -> Result<(), DriverError> {
        match *self {}
    }
    async fn type_text(&mut self, _: &str, _: &str) -> Result<(), DriverError> {
        match *self {}
    }
    async fn scroll_to_bottom(&mut self) -> Result<(), DriverError> {
        match *self {}
    }
    async fn wait_for(&mut self, _: &str, _: std::time::Duration) -> Result<(), DriverError> {
        match *self {}
    }
    async fn close(&mut self) -> Result<(), DriverError> {
        match *self {}
    }
}
