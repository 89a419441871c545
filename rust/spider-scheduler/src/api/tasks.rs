//! Task endpoints.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    routing::get,
    Json, Router,
};
use serde::Serialize;

use super::{json_body, path_param};
use crate::domain::{NewTask, ScheduledJobInfo, Task};
use crate::error::AppResult;
use crate::AppState;

/// Create the tasks router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/", get(list_tasks).post(create_task))
        .route("/tasks/running", get(running_tasks))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
}

/// Response of `DELETE /tasks/{id}`.
#[derive(Debug, Serialize)]
pub struct DeleteTaskResponse {
    pub id: i64,
    pub deleted: bool,
}

async fn list_tasks(State(state): State<AppState>) -> AppResult<Json<Vec<Task>>> {
    Ok(Json(state.tasks.list().await?))
}

async fn create_task(
    State(state): State<AppState>,
    payload: Result<Json<NewTask>, JsonRejection>,
) -> AppResult<Json<Task>> {
    let new = json_body(payload)?;
    Ok(Json(state.tasks.create(new).await?))
}

async fn running_tasks(State(state): State<AppState>) -> Json<Vec<ScheduledJobInfo>> {
    Json(state.tasks.running().await)
}

async fn get_task(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<Task>> {
    let id = path_param(id)?;
    Ok(Json(state.tasks.get(id).await?))
}

async fn delete_task(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<DeleteTaskResponse>> {
    let id = path_param(id)?;
    state.tasks.delete(id).await?;
    Ok(Json(DeleteTaskResponse { id, deleted: true }))
}
