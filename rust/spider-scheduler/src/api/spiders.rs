//! Spider endpoints.

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Multipart, Path, Query, State,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{json_body, path_param, query_params};
use crate::domain::{NewSpider, RunEnvelope, RunRequest, Spider, SpiderPage, SpiderUpdate};
use crate::error::{AppError, AppResult};
use crate::services::UploadedScript;
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 100;

/// Create the spiders router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/spiders", get(list_spiders).post(create_spider))
        .route("/spiders/", get(list_spiders).post(create_spider))
        .route("/spiders/upload", post(upload_spider))
        .route("/spiders/run", post(run_spider))
        .route(
            "/spiders/{id}",
            get(get_spider).put(update_spider).delete(delete_spider),
        )
}

/// `skip`/`limit` pagination.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

/// Response of `DELETE /spiders/{id}`.
#[derive(Debug, Serialize)]
pub struct DeleteSpiderResponse {
    pub id: i64,
    pub name: String,
    pub deleted: bool,
    pub tasks_removed: usize,
}

async fn list_spiders(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> AppResult<Json<SpiderPage>> {
    let query = query_params(query)?;
    Ok(Json(state.spiders.list(query.skip, query.limit).await?))
}

async fn create_spider(
    State(state): State<AppState>,
    payload: Result<Json<NewSpider>, JsonRejection>,
) -> AppResult<Json<Spider>> {
    let new = json_body(payload)?;
    Ok(Json(state.spiders.create(new).await?))
}

/// Multipart fields: `name`, `description`, `language`, `file`.
async fn upload_spider(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<Spider>> {
    let mut multipart = multipart.map_err(|e| AppError::Validation(e.body_text()))?;

    let mut name = None;
    let mut description = None;
    let mut language = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.body_text()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::Validation("file has no file name".into()))?;
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(e.body_text()))?;
                file = Some((file_name, content.to_vec()));
            }
            "name" | "description" | "language" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(e.body_text()))?;
                match field_name.as_str() {
                    "name" => name = Some(value),
                    "description" => description = Some(value).filter(|d| !d.trim().is_empty()),
                    _ => language = Some(value),
                }
            }
            other => tracing::debug!(field = other, "Ignoring unknown upload field"),
        }
    }

    let name = name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::Validation("name is required".into()))?;
    let (file_name, content) = file.ok_or_else(|| AppError::Validation("file is required".into()))?;

    let spider = state
        .spiders
        .upload(UploadedScript {
            name,
            description,
            language: language.unwrap_or_else(|| "python".to_string()),
            file_name,
            content,
        })
        .await?;
    Ok(Json(spider))
}

async fn run_spider(
    State(state): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> AppResult<Json<RunEnvelope>> {
    let request = json_body(payload)?;
    Ok(Json(state.spiders.run(request).await?))
}

async fn get_spider(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<Spider>> {
    let id = path_param(id)?;
    Ok(Json(state.spiders.get(id).await?))
}

async fn update_spider(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<SpiderUpdate>, JsonRejection>,
) -> AppResult<Json<Spider>> {
    let id = path_param(id)?;
    let update = json_body(payload)?;
    Ok(Json(state.spiders.update(id, update).await?))
}

async fn delete_spider(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<DeleteSpiderResponse>> {
    let id = path_param(id)?;
    let (spider, tasks) = state.spiders.delete(id).await?;
    Ok(Json(DeleteSpiderResponse {
        id: spider.id,
        name: spider.name,
        deleted: true,
        tasks_removed: tasks.len(),
    }))
}
