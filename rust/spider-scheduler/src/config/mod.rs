//! Configuration management.
//!
//! Settings are layered, later sources winning:
//!
//! 1. Built-in defaults ([`AppConfig::default`])
//! 2. The settings file (`config/config.toml` unless another path is given)
//! 3. Environment variables `SPIDER__<SECTION>__<KEY>`
//! 4. `DATABASE_URL`, `DB_POOL_SIZE` and `NODE_PATH`
//!
//! [`Settings`] gives dotted-key access to the merged tree, [`AppConfig`] is
//! the typed view the rest of the crate consumes.
//!
//! ```rust,ignore
//! use spider_scheduler::config::{AppConfig, Settings};
//!
//! let settings = Settings::load(None)?;
//! let dir: String = settings.get_or("paths.screenshot", "screenshots".to_string());
//! let config = AppConfig::from_settings(&settings)?;
//! ```

pub mod error;
pub mod validator;

pub use error::{ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Settings file used when no path is supplied.
pub const DEFAULT_CONFIG_FILE: &str = "config/config.toml";

/// Merged settings tree with dotted-key lookup.
#[derive(Debug, Clone)]
pub struct Settings {
    inner: config::Config,
}

impl Settings {
    /// Load settings from defaults, the settings file and the environment.
    ///
    /// A missing settings file is not an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let file = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf);

        let inner = config::Config::builder()
            .add_source(
                config::Config::try_from(&AppConfig::default())
                    .context("Failed to build default settings")?,
            )
            .add_source(config::File::from(file.as_path()).required(false))
            .add_source(
                config::Environment::with_prefix("SPIDER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", database_url_from_env())?
            .set_override_option("database.pool_size", pool_size_from_env()?)?
            .set_override_option("runtime.node_path", std::env::var("NODE_PATH").ok())?
            .build()
            .with_context(|| format!("Failed to load settings from {}", file.display()))?;

        Ok(Self { inner })
    }

    /// Look up a dotted key such as `"browser.content_selector"`.
    ///
    /// Returns `None` when the key is absent or has a different type.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner.get(key).ok()
    }

    /// Look up a dotted key, falling back to `default`.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }
}

fn database_url_from_env() -> Option<String> {
    std::env::var("DATABASE_URL")
        .ok()
        .map(|url| strip_sqlite_scheme(&url).to_string())
}

fn pool_size_from_env() -> anyhow::Result<Option<i64>> {
    match std::env::var("DB_POOL_SIZE") {
        Ok(raw) => {
            let size: u32 = raw
                .trim()
                .parse()
                .with_context(|| format!("DB_POOL_SIZE must be a positive integer, got '{raw}'"))?;
            Ok(Some(i64::from(size)))
        }
        Err(_) => Ok(None),
    }
}

/// Accept both a bare path and a `sqlite://` URL.
pub fn strip_sqlite_scheme(url: &str) -> &str {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server.
    #[serde(default)]
    pub server: ServerConfig,
    /// SQLite store.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// File-system locations.
    #[serde(default)]
    pub paths: PathsConfig,
    /// External interpreter.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Headless browser.
    #[serde(default)]
    pub browser: BrowserConfig,
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load and validate configuration.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let settings = Settings::load(path)?;
        Self::from_settings(&settings)
    }

    /// Build the typed view from already loaded settings and validate it.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let config: AppConfig = settings
            .inner
            .clone()
            .try_deserialize()
            .context("Settings do not match the expected layout")?;

        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

// Runs are synchronous on the request, so this has to cover a browser run.
fn default_request_timeout() -> u64 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path.
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum number of concurrent sessions.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// How long a session waits on a locked database, in seconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

fn default_database_url() -> String {
    "spider.db".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Database file path with any `sqlite://` scheme removed.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(strip_sqlite_scheme(&self.url))
    }
}

/// File-system paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Browser cookie export (JSON array).
    #[serde(default = "default_cookie_path")]
    pub cookie: PathBuf,
    /// Screenshot output directory.
    #[serde(default = "default_screenshot_dir")]
    pub screenshot: PathBuf,
    /// Upload directory for spider scripts.
    #[serde(default = "default_spider_dir")]
    pub spider_dir: PathBuf,
    /// Script run for javascript spiders without a `module_path`.
    #[serde(default = "default_script")]
    pub default_script: PathBuf,
}

fn default_cookie_path() -> PathBuf {
    PathBuf::from("cookies.json")
}

fn default_screenshot_dir() -> PathBuf {
    PathBuf::from("screenshots")
}

fn default_spider_dir() -> PathBuf {
    PathBuf::from("spiders")
}

fn default_script() -> PathBuf {
    PathBuf::from("scripts/screenshot.js")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cookie: default_cookie_path(),
            screenshot: default_screenshot_dir(),
            spider_dir: default_spider_dir(),
            default_script: default_script(),
        }
    }
}

/// External interpreter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Interpreter binary for javascript spiders.
    #[serde(default = "default_node_path")]
    pub node_path: String,
    /// Upper bound on a single process run, in seconds.
    #[serde(default = "default_process_timeout")]
    pub process_timeout_secs: u64,
}

fn default_node_path() -> String {
    "node".to_string()
}

fn default_process_timeout() -> u64 {
    300
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_path: default_node_path(),
            process_timeout_secs: default_process_timeout(),
        }
    }
}

/// Headless browser configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run Chromium without a window.
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Explicit Chromium binary; autodetected when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_executable: Option<PathBuf>,
    /// CSS selector of the content blocks to wait for.
    #[serde(default = "default_content_selector")]
    pub content_selector: String,
    /// How long to wait for the first content block, in seconds.
    #[serde(default = "default_content_timeout")]
    pub content_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_content_selector() -> String {
    "article".to_string()
}

fn default_content_timeout() -> u64 {
    200
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            content_selector: default_content_selector(),
            content_timeout_secs: default_content_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to use JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
