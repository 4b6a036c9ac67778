//! Configuration management using the prefer crate for file discovery.
//!
//! Settings resolve in this order, later sources winning: built-in defaults,
//! the config file (`chanstats.{toml,yaml,json}`), environment variables
//! (including a `.env` loaded by `main`), then CLI flags.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::jobs::{catalog, JobDefinition, JobOverride};
use crate::repository::DbContext;
use crate::scrapers::BrowserEngineConfig;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "chanstats.db";

/// Timezone the ranking sites publish their days in.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Seoul;

const DEFAULT_PORT: u16 = 3030;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    pub database_filename: String,
    /// Overrides `data_dir`/`database_filename` when set.
    pub database_url: Option<String>,
    /// Zone used for cron schedules and relative dates.
    pub timezone: Tz,
    /// API request timeout in seconds.
    pub network_timeout: u64,
    /// User agent for API requests.
    pub user_agent: Option<String>,
    pub host: String,
    pub port: u16,
    pub browser: BrowserEngineConfig,
    /// Per-job overrides keyed by job id.
    pub jobs: HashMap<String, JobOverride>,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chanstats");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            timezone: DEFAULT_TIMEZONE,
            network_timeout: 30,
            user_agent: None,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            browser: BrowserEngineConfig::default(),
            jobs: HashMap::new(),
        }
    }
}

impl Settings {
    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!("sqlite:{}", self.database_path().display()),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        if self.database_url.is_none() {
            std::fs::create_dir_all(&self.data_dir)?;
        }
        Ok(())
    }

    pub fn create_db_context(&self) -> DbContext {
        DbContext::from_url(&self.database_url())
    }

    /// Built-in jobs with the configured overrides applied.
    pub fn job_definitions(&self) -> Vec<JobDefinition> {
        let mut jobs = catalog::builtin();
        for (id, o) in &self.jobs {
            match jobs.iter_mut().find(|j| &j.id == id) {
                Some(def) => def.apply(o),
                None => warn!("Ignoring settings for unknown job '{}'", id),
            }
        }
        jobs
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("DATABASE_URL") {
            debug!("Using DATABASE_URL from environment: {}", url);
            self.database_url = Some(url);
        }
        if let Some(tz) = var("CHANSTATS_TZ") {
            self.timezone = parse_timezone(&tz)?;
        }
        if let Some(secs) = var("NETWORK_TIMEOUT") {
            self.network_timeout = secs
                .parse()
                .with_context(|| format!("NETWORK_TIMEOUT must be seconds, got {:?}", secs))?;
        }
        if let Some(port) = var("PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("PORT must be a port number, got {:?}", port))?;
        }
        Ok(())
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| anyhow!("unknown timezone {:?}: {}", name, e))
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub network_timeout: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub browser: Option<BrowserEngineConfig>,
    #[serde(default)]
    pub jobs: HashMap<String, JobOverride>,
    /// File the config was read from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a `chanstats` config file in the standard locations.
    pub async fn load() -> Result<Self> {
        let discovered = match prefer::load("chanstats").await {
            Ok(found) => found.source_path().cloned(),
            Err(_) => None,
        };
        match discovered {
            Some(path) => Self::load_from_path(&path).await,
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file. The format follows the extension.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let mut config: Config = match ext {
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config {}", path.display()))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config {}", path.display()))?,
            _ => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config {}", path.display()))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory relative paths are resolved against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(Path::to_path_buf))
    }

    /// Expand `~` and resolve relative paths against `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) -> Result<()> {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = Some(url.clone());
        }
        if let Some(ref tz) = self.timezone {
            settings.timezone = parse_timezone(tz)?;
        }
        if let Some(timeout) = self.network_timeout {
            settings.network_timeout = timeout;
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(ref host) = self.host {
            settings.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(ref browser) = self.browser {
            settings.browser = browser.clone();
        }
        for (id, o) in &self.jobs {
            settings.jobs.insert(id.clone(), o.clone());
        }
        Ok(())
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (skips discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory (--data-dir flag).
    pub data_dir: Option<PathBuf>,
}

/// Resolve settings from every source.
pub async fn load_settings(options: LoadOptions) -> Result<Settings> {
    let config = match &options.config_path {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await?,
    };
    if let Some(path) = &config.source_path {
        debug!("Loaded config from {}", path.display());
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = config.base_dir().unwrap_or_else(|| cwd.clone());

    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings, &base_dir)?;
    settings.apply_env(|name| std::env::var(name).ok())?;
    settings.browser = settings.browser.with_env_overrides();

    if let Some(data_dir) = options.data_dir {
        settings.data_dir = if data_dir.is_absolute() {
            data_dir
        } else {
            cwd.join(data_dir)
        };
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::DateSpec;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_toml_config_applies_to_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chanstats.toml");
        std::fs::write(
            &path,
            r#"
            data_dir = "./data"
            timezone = "UTC"
            port = 8080

            [browser]
            headless = false

            [jobs.playboard-viewed]
            enabled = false
            target_date = "yesterday"
            "#,
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let mut settings = Settings::default();
        config
            .apply_to_settings(&mut settings, &config.base_dir().unwrap())
            .unwrap();

        assert_eq!(settings.data_dir, dir.path().join("./data"));
        assert_eq!(settings.timezone, chrono_tz::UTC);
        assert_eq!(settings.port, 8080);
        assert!(!settings.browser.headless);
        assert_eq!(
            settings.jobs["playboard-viewed"].target_date,
            Some(DateSpec::Yesterday)
        );
    }

    #[tokio::test]
    async fn test_yaml_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chanstats.yaml");
        std::fs::write(&path, "network_timeout: 5\nuser_agent: chanstats-test/1.0\n").unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.network_timeout, Some(5));
        assert_eq!(config.user_agent.as_deref(), Some("chanstats-test/1.0"));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(|name| match name {
                "DATABASE_URL" => Some("sqlite:/tmp/x.db".into()),
                "CHANSTATS_TZ" => Some("Asia/Tokyo".into()),
                "PORT" => Some("9000".into()),
                "NETWORK_TIMEOUT" => Some("  ".into()),
                _ => None,
            })
            .unwrap();

        assert_eq!(settings.database_url(), "sqlite:/tmp/x.db");
        assert_eq!(settings.timezone, chrono_tz::Asia::Tokyo);
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.network_timeout, 30);
    }

    #[test]
    fn test_bad_env_values_are_errors() {
        let mut settings = Settings::default();
        assert!(settings
            .apply_env(|name| (name == "CHANSTATS_TZ").then(|| "Mars/Olympus".to_string()))
            .is_err());
        assert!(settings
            .apply_env(|name| (name == "PORT").then(|| "http".to_string()))
            .is_err());
    }

    #[test]
    fn test_job_definitions_apply_overrides() {
        let mut settings = Settings::default();
        settings.jobs.insert(
            "youtube".into(),
            JobOverride {
                enabled: Some(false),
                schedule: Some("0 15 4 * * *".into()),
                ..JobOverride::default()
            },
        );
        settings
            .jobs
            .insert("no-such-job".into(), JobOverride::default());

        let jobs = settings.job_definitions();
        assert_eq!(jobs.len(), catalog::builtin().len());
        let youtube = jobs.iter().find(|j| j.id == "youtube").unwrap();
        assert!(!youtube.enabled);
        assert_eq!(youtube.schedule, "0 15 4 * * *");
    }
}
