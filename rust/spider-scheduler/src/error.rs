//! Application error taxonomy.
//!
//! Every failure that can reach a caller is one of the [`AppError`] variants.
//! The HTTP mapping lives here too, so handlers can simply return
//! `Result<_, AppError>`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Domain and infrastructure errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Unknown spider or task id.
    #[error("{entity} with id {id} not found")]
    NotFound {
        /// Entity kind ("Spider", "Task").
        entity: &'static str,
        /// The id that was looked up.
        id: i64,
    },

    /// Unique constraint violated.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Malformed request or payload.
    #[error("{0}")]
    Validation(String),

    /// Cron expression rejected.
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Language tag that has no execution strategy.
    #[error("Unsupported spider language: {0}")]
    UnsupportedLanguage(String),

    /// Spider exists but is switched off.
    #[error("Spider {0} is not active")]
    NotRunnable(i64),

    /// The `module_path`/`class_name` pair does not resolve.
    #[error("Execution target not found: {0}")]
    TargetNotFound(String),

    /// The routine or process ran and failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The process succeeded but printed something that is not JSON.
    #[error("Spider output malformed: {0}")]
    OutputMalformed(String),

    /// The scheduler has no job for this task.
    #[error("Task {0} not found in scheduler")]
    NotScheduled(i64),

    /// SQLite failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Anything else.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result alias used across services and handlers.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Shorthand for a missing spider.
    pub fn spider_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "Spider",
            id,
        }
    }

    /// Shorthand for a missing task.
    pub fn task_not_found(id: i64) -> Self {
        Self::NotFound { entity: "Task", id }
    }

    /// Machine readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::Validation(_) => "validation_error",
            Self::InvalidCron(_) => "invalid_cron",
            Self::UnsupportedLanguage(_) => "unsupported_language",
            Self::NotRunnable(_) => "not_runnable",
            Self::TargetNotFound(_) => "target_not_found",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::OutputMalformed(_) => "output_malformed",
            Self::NotScheduled(_) => "not_scheduled",
            Self::Database(_) => "database_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } | Self::NotScheduled(_) => StatusCode::NOT_FOUND,
            Self::AlreadyExists(_)
            | Self::Validation(_)
            | Self::InvalidCron(_)
            | Self::UnsupportedLanguage(_)
            | Self::NotRunnable(_)
            | Self::TargetNotFound(_) => StatusCode::BAD_REQUEST,
            Self::ExecutionFailed(_)
            | Self::OutputMalformed(_)
            | Self::Database(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Re-classify a not-found as a validation failure.
    ///
    /// The run endpoint reports unknown spiders as 400.
    #[must_use]
    pub fn not_found_as_validation(self) -> Self {
        match self {
            Self::NotFound { .. } => Self::Validation(self.to_string()),
            other => other,
        }
    }
}

/// Error body returned to HTTP callers.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "Request rejected");
        }
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::spider_not_found(1).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::NotScheduled(3).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::AlreadyExists("Spider 's1'".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::InvalidCron("* *".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ExecutionFailed("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::OutputMalformed("xx".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_as_validation() {
        let err = AppError::spider_not_found(9).not_found_as_validation();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Spider with id 9 not found");

        let err = AppError::NotRunnable(9).not_found_as_validation();
        assert!(matches!(err, AppError::NotRunnable(9)));
    }
}
