//! API error types.
//!
//! Every variant maps to a stable error code and HTTP status.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(ApiError::NotFound)`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::metadata::store::StoreError;
use crate::storage::adapter::StorageError;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `not_found`.
    pub error: String,
    /// Human-readable description.
    pub message: String,
}

/// Request-level error taxonomy.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A required input is missing or malformed. Never retried.
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    /// An identifier collided on creation.
    #[error("{entity} already exists")]
    Constraint { entity: &'static str },

    /// The storage adapter failed.
    #[error("storage backend unavailable")]
    Backend(#[source] StorageError),

    /// Absent, expired and deleted objects are indistinguishable.
    #[error("object not found")]
    NotFound,

    /// Request body exceeds the configured upload limit.
    #[error("file exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    /// Catch-all for unexpected internal errors.
    #[error("internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    /// The `X-Wallet` header is absent or empty.
    pub fn missing_wallet() -> Self {
        ApiError::Validation {
            code: "missing_wallet",
            message: "X-Wallet header is required".to_string(),
        }
    }

    /// Return the error code string.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { code, .. } => *code,
            ApiError::Constraint { .. } => "conflict",
            ApiError::Backend(_) => "storage_error",
            ApiError::NotFound => "not_found",
            ApiError::PayloadTooLarge { .. } => "payload_too_large",
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Constraint { .. } => StatusCode::CONFLICT,
            ApiError::Backend(_) => StatusCode::BAD_GATEWAY,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Constraint { entity, .. } => ApiError::Constraint { entity },
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => ApiError::NotFound,
            other => ApiError::Backend(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::Backend(e) => tracing::warn!(error = %e, "storage adapter failure"),
            ApiError::Internal(e) => tracing::error!(error = %e, "internal error"),
            _ => {}
        }
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
