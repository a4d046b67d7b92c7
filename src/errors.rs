use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no client address available")]
    NoIdentity,

    #[error("session token missing")]
    CredentialAbsent,

    #[error("session token not recognized")]
    CredentialUnknown,

    #[error("session token expired")]
    CredentialExpired,

    #[error("session token usage quota exhausted")]
    QuotaExhausted,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream request timed out")]
    UpstreamTimeout,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::NoIdentity => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "no_identity",
                "No address in header".to_string(),
            ),
            // Absent and unknown credentials must be indistinguishable to the caller.
            AppError::CredentialAbsent | AppError::CredentialUnknown => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_session",
                "Unauthorized".to_string(),
            ),
            AppError::CredentialExpired => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "session_expired",
                "Session expired".to_string(),
            ),
            AppError::QuotaExhausted => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "quota_exhausted",
                "Reached max usage of this token".to_string(),
            ),
            AppError::Upstream(e) => {
                tracing::warn!("Upstream failure: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "upstream_failed",
                    "upstream request failed".to_string(),
                )
            }
            AppError::UpstreamTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "timeout_error",
                "upstream_timeout",
                "upstream request timed out".to_string(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
