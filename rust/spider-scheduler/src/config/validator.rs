//! Startup validation of the merged configuration.

use std::path::Path;

use super::error::{ConfigResult, ConfigurationError};
use super::AppConfig;

/// Checks an [`AppConfig`] before any component is built.
///
/// All problems are reported at once rather than one per restart.
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration.
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if config.server.port == 0 {
            errors.push(ConfigurationError::invalid(
                "server.port must not be 0",
                "Set SPIDER__SERVER__PORT or --port to a free TCP port, e.g. 8000",
            ));
        }
        if config.server.timeout_secs == 0 {
            errors.push(zero_timeout("server.timeout_secs", "SPIDER__SERVER__TIMEOUT_SECS"));
        }

        if config.database.url.trim().is_empty() {
            errors.push(ConfigurationError::missing_required(
                "database.url",
                "Storing spiders and tasks",
                "DATABASE_URL or SPIDER__DATABASE__URL",
            ));
        }
        if config.database.pool_size == 0 {
            errors.push(ConfigurationError::invalid(
                "database.pool_size must be at least 1",
                "Set DB_POOL_SIZE or SPIDER__DATABASE__POOL_SIZE to a positive number",
            ));
        }

        if config.runtime.node_path.trim().is_empty() {
            errors.push(ConfigurationError::missing_required(
                "runtime.node_path",
                "Running javascript spiders",
                "NODE_PATH or SPIDER__RUNTIME__NODE_PATH",
            ));
        }
        if config.runtime.process_timeout_secs == 0 {
            errors.push(zero_timeout(
                "runtime.process_timeout_secs",
                "SPIDER__RUNTIME__PROCESS_TIMEOUT_SECS",
            ));
        }

        if config.browser.content_selector.trim().is_empty() {
            errors.push(ConfigurationError::missing_required(
                "browser.content_selector",
                "Locating content blocks in the screenshot routine",
                "SPIDER__BROWSER__CONTENT_SELECTOR",
            ));
        }
        if config.browser.content_timeout_secs == 0 {
            errors.push(zero_timeout(
                "browser.content_timeout_secs",
                "SPIDER__BROWSER__CONTENT_TIMEOUT_SECS",
            ));
        }

        let paths = [
            ("paths.cookie", &config.paths.cookie, "SPIDER__PATHS__COOKIE"),
            ("paths.screenshot", &config.paths.screenshot, "SPIDER__PATHS__SCREENSHOT"),
            ("paths.spider_dir", &config.paths.spider_dir, "SPIDER__PATHS__SPIDER_DIR"),
            (
                "paths.default_script",
                &config.paths.default_script,
                "SPIDER__PATHS__DEFAULT_SCRIPT",
            ),
        ];
        for (setting, path, env_var) in paths {
            if is_empty_path(path) {
                errors.push(ConfigurationError::missing_required(
                    setting,
                    "File-system layout",
                    env_var,
                ));
            }
        }

        match ConfigurationError::collect(errors) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

fn zero_timeout(setting: &str, env_var: &str) -> ConfigurationError {
    ConfigurationError::invalid(
        format!("{setting} must be greater than 0"),
        format!("Set {env_var} to a number of seconds"),
    )
}

fn is_empty_path(path: &Path) -> bool {
    path.as_os_str().is_empty()
}
