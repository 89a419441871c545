//! External interpreter runs for javascript spiders.
//!
//! The script is `module_path` with `class_name` as its first argument, or the
//! configured default script with the spider name when `module_path` is
//! empty. Run parameters are passed as JSON in `SPIDER_PARAMS`. Standard
//! output, if any, must be a single JSON document.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;

use crate::config::AppConfig;
use crate::domain::Spider;
use crate::error::{AppError, AppResult};

/// Environment variable carrying run parameters.
pub const PARAMS_ENV: &str = "SPIDER_PARAMS";

const MAX_ECHOED_OUTPUT: usize = 512;

/// Spawns spider scripts and collects their output.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: String,
    default_script: PathBuf,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(interpreter: impl Into<String>, default_script: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            default_script: default_script.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.runtime.node_path.clone(),
            config.paths.default_script.clone(),
            Duration::from_secs(config.runtime.process_timeout_secs),
        )
    }

    /// Script and first argument for `spider`.
    pub fn invocation(&self, spider: &Spider) -> (PathBuf, String) {
        if spider.module_path.trim().is_empty() {
            (self.default_script.clone(), spider.name.clone())
        } else {
            (PathBuf::from(&spider.module_path), spider.class_name.clone())
        }
    }

    /// Run the spider's script to completion.
    pub async fn run(&self, spider: &Spider, params: &Value) -> AppResult<Value> {
        let (script, argument) = self.invocation(spider);
        tracing::info!(
            spider_id = spider.id,
            interpreter = %self.interpreter,
            script = %script.display(),
            argument = %argument,
            "Spawning spider process"
        );

        let child = Command::new(&self.interpreter)
            .arg(&script)
            .arg(&argument)
            .env(PARAMS_ENV, params.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::ExecutionFailed(format!("failed to start '{}': {e}", self.interpreter))
            })?;

        // dropping the child on timeout kills it
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|elapsed| {
                AppError::ExecutionFailed(format!(
                    "{} did not finish within {}s ({elapsed})",
                    script.display(),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::ExecutionFailed(format!("failed to collect output: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(
                spider_id = spider.id,
                status = %output.status,
                stderr = %stderr.trim(),
                "Spider process failed"
            );
            return Err(AppError::ExecutionFailed(format!(
                "{} ({}): {}",
                script.display(),
                output.status,
                stderr.trim()
            )));
        }

        parse_output(&output.stdout)
    }
}

/// Interpret a script's standard output.
///
/// Empty output is `null`; anything else must be JSON.
pub fn parse_output(stdout: &[u8]) -> AppResult<Value> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(trimmed).map_err(|e| {
        let shown: String = trimmed.chars().take(MAX_ECHOED_OUTPUT).collect();
        AppError::OutputMalformed(format!("{e}: {shown}"))
    })
}
