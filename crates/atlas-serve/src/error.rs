//! API error types and response formatting.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error type that converts to appropriate HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Artifact not built yet.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal server error (task join, etc.).
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Artifact store error.
    #[error("storage error: {0}")]
    Storage(atlas_build::Error),
}

impl From<atlas_build::Error> for ApiError {
    fn from(err: atlas_build::Error) -> Self {
        match err {
            atlas_build::Error::MissingArtifact(msg) => Self::NotFound(msg),
            atlas_build::Error::InvalidQuery(msg) => Self::BadRequest(msg),
            other => Self::Storage(other),
        }
    }
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone())),
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    Some("An internal error occurred".to_string()),
                )
            }
            Self::Storage(err) => {
                tracing::error!(error = %err, "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    Some("A storage error occurred".to_string()),
                )
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_errors_map_to_status() {
        let missing: ApiError = atlas_build::Error::MissingArtifact("x".to_string()).into();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);

        let bad: ApiError = atlas_build::Error::InvalidQuery("x".to_string()).into();
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let storage: ApiError = atlas_build::Error::Storage("disk".to_string()).into();
        assert_eq!(
            storage.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
