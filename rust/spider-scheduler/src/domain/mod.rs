//! Core records and request payloads.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

/// Execution language of a spider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// In-process routine looked up in the routine registry.
    Python,
    /// External interpreter process.
    Javascript,
}

impl Language {
    /// Parse a stored or submitted language tag.
    pub fn parse(tag: &str) -> AppResult<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "python" => Ok(Self::Python),
            "javascript" => Ok(Self::Javascript),
            _ => Err(AppError::UnsupportedLanguage(tag.to_string())),
        }
    }

    /// Canonical tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
        }
    }

    /// Script extension accepted on upload.
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::Javascript => "js",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored spider definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spider {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub module_path: String,
    pub class_name: String,
    pub is_active: bool,
    /// Kept as text; an unknown tag fails at run time.
    pub language: String,
    /// Saved script for uploaded spiders.
    #[serde(skip)]
    pub script_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cron binding to a spider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: i64,
    pub spider_id: i64,
    pub cron_expression: String,
    pub description: Option<String>,
    pub job_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    Language::Python.as_str().to_string()
}

/// Body of `POST /spiders/`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSpider {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub module_path: String,
    pub class_name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_language")]
    pub language: String,
    /// Only set by the upload path.
    #[serde(skip)]
    pub script_path: Option<String>,
}

impl NewSpider {
    /// Reject blank required fields and unknown languages.
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("name must not be empty".into()));
        }
        if self.class_name.trim().is_empty() {
            return Err(AppError::Validation("class_name must not be empty".into()));
        }
        let language = Language::parse(&self.language)?;
        if language == Language::Python && self.module_path.trim().is_empty() {
            return Err(AppError::Validation(
                "module_path must not be empty for python spiders".into(),
            ));
        }
        Ok(())
    }
}

/// Body of `PUT /spiders/{id}`. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpiderUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub module_path: Option<String>,
    pub class_name: Option<String>,
    pub is_active: Option<bool>,
    pub language: Option<String>,
}

impl SpiderUpdate {
    /// Reject a blank name and unknown languages.
    pub fn validate(&self) -> AppResult<()> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::Validation("name must not be empty".into()));
        }
        if let Some(language) = &self.language {
            Language::parse(language)?;
        }
        Ok(())
    }

    /// Whether the update carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.module_path.is_none()
            && self.class_name.is_none()
            && self.is_active.is_none()
            && self.language.is_none()
    }
}

/// Body of `POST /tasks/`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub spider_id: i64,
    pub cron_expression: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Body of `POST /spiders/run`.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub spider_id: i64,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Paginated spider listing.
#[derive(Debug, Clone, Serialize)]
pub struct SpiderPage {
    pub total: i64,
    pub spiders: Vec<Spider>,
}

/// Uniform result of a spider run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEnvelope {
    pub status: String,
    pub message: String,
    pub result: Value,
}

impl RunEnvelope {
    /// Successful run of `spider`.
    pub fn success(spider: &Spider, result: Value) -> Self {
        Self {
            status: "success".to_string(),
            message: format!("Spider {} ({}) run successfully", spider.id, spider.name),
            result,
        }
    }
}

/// Scheduler snapshot entry, as served by `GET /tasks/running`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledJobInfo {
    pub task_id: i64,
    pub job_id: String,
    pub name: String,
    pub next_run_time: Option<DateTime<Utc>>,
    pub trigger: String,
}
