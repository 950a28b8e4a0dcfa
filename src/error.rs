use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Gateway error type.
///
/// Only two variants are ever client-visible: `TooManyRequests` (admission
/// denied by the gate) and upstream relay failures surfaced by the
/// pass-through handler. Everything else is absorbed and logged.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Admission Control =====
    #[error("too many requests, retry after {retry_after_secs}s")]
    TooManyRequests { retry_after_secs: u64 },

    // ===== Upstream Errors =====
    #[error("upstream connect error: {0}")]
    UpstreamConnect(String),

    #[error("upstream request error: {0}")]
    Upstream(#[from] reqwest::Error),

    // ===== Internal Server Errors =====
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::UpstreamConnect(_) | AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::TooManyRequests { .. } => "RATE_LIMITED",
            AppError::UpstreamConnect(_) => "UPSTREAM_CONNECT_ERROR",
            AppError::Upstream(_) => "UPSTREAM_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get a user-friendly error message (without sensitive details)
    pub fn user_message(&self) -> String {
        match self {
            AppError::TooManyRequests { .. } => "Too many requests. Please slow down.".to_string(),
            AppError::UpstreamConnect(_) | AppError::Upstream(_) => {
                "Upstream service error".to_string()
            }
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(
                error = %self,
                error_code = %code,
                "Request denied by admission control"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }

    /// Create an internal server error
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();

        // Admission denials carry a machine-readable retry hint
        let response_body = match &self {
            AppError::TooManyRequests { retry_after_secs } => json!({
                "status": "error",
                "message": self.user_message(),
                "retryAfter": retry_after_secs,
            }),
            _ if status.is_server_error() => json!({
                "status": "error",
                "message": "Internal server error",
                "error_code": self.error_code(),
            }),
            _ => json!({
                "status": "error",
                "message": self.user_message(),
                "error_code": self.error_code(),
            }),
        };

        (status, Json(response_body)).into_response()
    }
}
