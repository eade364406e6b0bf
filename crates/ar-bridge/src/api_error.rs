//! HTTP API error type. Every error response is shaped
//! `{ "error": <string> }` with the status the error kind maps to.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use ar_core::store::StoreError;
use ar_engine::manual::ManualTransitionError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Entity missing. 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Shape or validation failure on input. 400.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request would violate an invariant (disallowed transition,
    /// missing prerequisite, lost optimistic race). 409.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Anything else. 500.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound("not found".into()),
            StoreError::AlreadyExists => ApiError::Conflict("already exists".into()),
            StoreError::Conflict => {
                ApiError::Conflict("the issue changed underneath this request, retry".into())
            }
            StoreError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<ManualTransitionError> for ApiError {
    fn from(e: ManualTransitionError) -> Self {
        ApiError::Conflict(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
