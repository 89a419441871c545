//! HTTP API endpoints.

pub mod health;
pub mod screenshot;
pub mod spiders;
pub mod tasks;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query,
    },
    Json, Router,
};

use crate::error::{AppError, AppResult};
use crate::AppState;

/// Create the API router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(spiders::router())
        .merge(tasks::router())
        .merge(screenshot::router())
}

/// Unwrap a JSON body, reporting malformed payloads as 400.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

/// Unwrap a path parameter, reporting unparsable segments as 400.
pub(crate) fn path_param<T>(param: Result<Path<T>, PathRejection>) -> AppResult<T> {
    param
        .map(|Path(value)| value)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

/// Unwrap a query string, reporting malformed parameters as 400.
pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> AppResult<T> {
    query
        .map(|Query(value)| value)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}
