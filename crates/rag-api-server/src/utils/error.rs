use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Sum-type error propagated across service boundaries. Variants mirror the
/// platform's error kinds so handlers never have to guess recoverability
/// from a string.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(QuotaExceededInfo),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("corrupted: {0}")]
    Corrupted(String),

    #[error("internal: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaExceededInfo {
    pub limit: i64,
    pub used: i64,
}

impl std::fmt::Display for QuotaExceededInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} queries used this period", self.used, self.limit)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "database error");
        ApiError::Unavailable(format!("database error: {err}"))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        tracing::error!(error = %err, "upstream http error");
        ApiError::Unavailable(format!("upstream request failed: {err}"))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    quota: Option<QuotaExceededInfo>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message, quota) = match self {
            ApiError::Validation(msg) => {
                tracing::warn!("validation: {msg}");
                (StatusCode::BAD_REQUEST, "Validation", msg, None)
            }
            ApiError::NotFound(msg) => {
                tracing::info!("not found: {msg}");
                (StatusCode::NOT_FOUND, "NotFound", msg, None)
            }
            ApiError::PermissionDenied(msg) => {
                tracing::info!("permission denied: {msg}");
                (StatusCode::FORBIDDEN, "PermissionDenied", msg, None)
            }
            ApiError::QuotaExceeded(info) => {
                tracing::info!(limit = info.limit, used = info.used, "quota exceeded");
                let msg = info.to_string();
                (StatusCode::TOO_MANY_REQUESTS, "QuotaExceeded", msg, Some(info))
            }
            ApiError::Unavailable(msg) => {
                tracing::error!("unavailable: {msg}");
                (StatusCode::SERVICE_UNAVAILABLE, "Unavailable", msg, None)
            }
            ApiError::DeadlineExceeded(msg) => {
                tracing::warn!("deadline exceeded: {msg}");
                (StatusCode::GATEWAY_TIMEOUT, "DeadlineExceeded", msg, None)
            }
            ApiError::Corrupted(msg) => {
                tracing::warn!("corrupted: {msg}");
                (StatusCode::UNPROCESSABLE_ENTITY, "Corrupted", msg, None)
            }
            ApiError::Internal(msg) => {
                tracing::error!("internal: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal", msg, None)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type,
            message,
            quota,
        });

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
