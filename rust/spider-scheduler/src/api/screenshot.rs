//! Ad-hoc screenshot endpoints.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::query_params;
use crate::browser;
use crate::domain::RunEnvelope;
use crate::error::{AppError, AppResult, ErrorBody};
use crate::AppState;

/// Create the screenshot router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/screenshot", get(take_screenshot))
        .route("/pic", get(latest_picture))
}

#[derive(Debug, Deserialize)]
struct ScreenshotQuery {
    url: String,
}

/// Capture the first content block of `?url=` right away.
async fn take_screenshot(
    State(state): State<AppState>,
    query: Result<Query<ScreenshotQuery>, QueryRejection>,
) -> AppResult<Json<RunEnvelope>> {
    let query = query_params(query)?;
    let url = url::Url::parse(&query.url)
        .map_err(|e| AppError::Validation(format!("Invalid url '{}': {e}", query.url)))?;

    let outcome = browser::capture_first_block(&state.screenshots, url.as_str())
        .await
        .map_err(|e| AppError::ExecutionFailed(format!("{e:#}")))?;
    let result = serde_json::to_value(&outcome).map_err(anyhow::Error::from)?;

    Ok(Json(RunEnvelope {
        status: "success".to_string(),
        message: format!("Screenshot of {url} saved"),
        result,
    }))
}

/// Most recent screenshot as `image/png`.
async fn latest_picture(State(state): State<AppState>) -> AppResult<Response> {
    let Some(path) = browser::latest_screenshot(&state.screenshots.output_dir).await? else {
        let body = ErrorBody {
            error: "not_found",
            message: "No screenshot available".to_string(),
        };
        return Ok((StatusCode::NOT_FOUND, Json(body)).into_response());
    };

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}
