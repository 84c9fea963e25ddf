//! Error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use skillswap_core::credits::CreditError;
use skillswap_shared::AppError;
use tracing::error;

/// Error returned by handlers; renders as `{"error": code, "message": text}`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl ApiError {
    /// A 400 for malformed query parameters or bodies.
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self(AppError::Validation {
            code,
            message: message.into(),
        })
    }
}

impl From<CreditError> for ApiError {
    fn from(err: CreditError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Internal details stay in the logs
        let message = if status.is_server_error() {
            error!(error = %self.0, "request failed");
            "An error occurred".to_string()
        } else {
            self.0.to_string()
        };

        (
            status,
            Json(json!({
                "error": self.0.error_code().to_lowercase(),
                "message": message
            })),
        )
            .into_response()
    }
}
