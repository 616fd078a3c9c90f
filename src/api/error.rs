use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::error::Error as StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Store(err) => match err {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                StoreError::Conflict(_) => (StatusCode::CONFLICT, err.to_string()),
                StoreError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, err.to_string()),
                StoreError::BadRequest(_) | StoreError::Format(_) => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                StoreError::Sqlite(_) | StoreError::Io(_) | StoreError::Json(_) => {
                    tracing::error!("request failed: {err}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal storage error".to_string(),
                    )
                }
            },
            ApiError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            ApiError::Unauthorized(reason) => (StatusCode::UNAUTHORIZED, reason.clone()),
            ApiError::Internal(reason) => {
                tracing::error!("request failed: {reason}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        let body = Json(ErrorBody {
            code: status.as_u16(),
            message,
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
