//! HTTP error mapping.
//!
//! Every handler failure becomes an [`ApiError`], rendered as a JSON body
//! `{"detail": "..."}` with the matching status code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use biogate_device::OperationError;
use serde_json::json;

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed path, query or body.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or wrong API key.
    #[error("Invalid or missing API key")]
    Unauthorized,

    /// A device operation failed.
    #[error("{context}: {source}")]
    Device {
        context: &'static str,
        #[source]
        source: OperationError,
    },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Wrap a device failure with what the handler was doing.
    pub fn device(context: &'static str) -> impl FnOnce(OperationError) -> Self {
        move |source| Self::Device { context, source }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Device { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
