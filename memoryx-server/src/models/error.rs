//! The error taxonomy of spec.md §7, expressed as kinds rather than one
//! type per failure site.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed body, missing API key, unknown memory id. No retry, no task created.
    #[error("{0}")]
    ClientFault(String),

    /// Search or memory cap hit.
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    /// LLM / vector / graph temporarily unavailable. Caller should treat
    /// the corresponding task as still PENDING.
    #[error("upstream temporarily unavailable: {0}")]
    TransientUpstream(String),

    /// Schema mismatch, auth failure against an upstream store.
    #[error("upstream failure: {0}")]
    PermanentUpstream(String),

    /// Request or task exceeded its deadline.
    #[error("deadline exceeded: {0}")]
    Deadline(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
    /// Present only on quota-exhausted responses (spec.md §6).
    pub upgrade_hint: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, upgrade_hint) = match &self {
            ApiError::ClientFault(_) => (StatusCode::BAD_REQUEST, "client_fault", None),
            ApiError::QuotaExhausted(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                "quota_exhausted",
                Some("upgrade your plan for a higher daily search limit"),
            ),
            ApiError::TransientUpstream(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "transient_upstream", None)
            }
            ApiError::PermanentUpstream(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "permanent_upstream", None)
            }
            ApiError::Deadline(_) => (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded", None),
            ApiError::Database(_) | ApiError::Config(_) | ApiError::Json(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: None,
                upgrade_hint: upgrade_hint.map(String::from),
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
