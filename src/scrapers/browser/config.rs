//! Browser engine configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Browser engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Browser engine type.
    #[serde(default)]
    pub engine: BrowserEngineType,

    /// Run in headless mode (default: true). `IS_HEADLESS=false` overrides.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Explicit Chrome/Chromium binary. `CHROME_BIN` overrides.
    #[serde(default)]
    pub chrome_bin: Option<PathBuf>,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Navigation and CDP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Default user agent; jobs may override per session.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Window size as (width, height).
    #[serde(default = "default_window")]
    pub window: (u32, u32),
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            engine: BrowserEngineType::default(),
            headless: default_headless(),
            chrome_bin: None,
            proxy: None,
            timeout: default_timeout(),
            chrome_args: Vec::new(),
            remote_url: None,
            user_agent: None,
            window: default_window(),
        }
    }
}

impl BrowserEngineConfig {
    /// Apply `IS_HEADLESS`, `CHROME_BIN` and `BROWSER_URL` from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("IS_HEADLESS") {
            self.headless = !v.eq_ignore_ascii_case("false");
        }
        if let Ok(v) = std::env::var("CHROME_BIN") {
            if !v.trim().is_empty() {
                self.chrome_bin = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = std::env::var("BROWSER_URL") {
            if !v.trim().is_empty() {
                self.remote_url = Some(v);
            }
        }
        self
    }
}

pub fn default_headless() -> bool {
    true
}

pub fn default_timeout() -> u64 {
    90
}

fn default_window() -> (u32, u32) {
    (1024, 768)
}

/// Browser engine types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BrowserEngineType {
    /// Chromium with stealth patches (default).
    #[default]
    Stealth,

    /// No stealth patches (for debugging).
    Standard,
}

/// A cookie injected before the first navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSpec {
    pub name: String,
    /// Literal value. Ignored when `value_env` resolves.
    #[serde(default)]
    pub value: String,
    /// Environment variable holding the value.
    #[serde(default)]
    pub value_env: Option<String>,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl CookieSpec {
    /// Effective value, or `None` when it is empty after env resolution.
    pub fn resolved_value(&self) -> Option<String> {
        let value = self
            .value_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .unwrap_or_else(|| self.value.clone());
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}
