use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use neurogram_core::CoreError;
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Upload over the configured limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Path outside the allowed directory (403)
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Core(err) => match err {
                CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                CoreError::KeyNotFound(_) => (StatusCode::NOT_FOUND, "KEY_NOT_FOUND"),
                CoreError::Range { .. } => (StatusCode::BAD_REQUEST, "RANGE_ERROR"),
                CoreError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                CoreError::InvalidParameter(_) => (StatusCode::BAD_REQUEST, "INVALID_PARAMETER"),
                CoreError::UnresolvedChannels(_) => {
                    (StatusCode::BAD_REQUEST, "UNRESOLVED_CHANNELS")
                }
                CoreError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
                CoreError::UnsupportedFormat(_) => {
                    (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_FORMAT")
                }
                CoreError::CorruptFile(_) => (StatusCode::UNPROCESSABLE_ENTITY, "CORRUPT_FILE"),
                CoreError::CorruptCache { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "CORRUPT_CACHE")
                }
                CoreError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
                CoreError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ENCODE_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("Background task failed: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_status_mapping() {
        let cases = [
            (CoreError::NotFound("s".into()), StatusCode::NOT_FOUND),
            (CoreError::KeyNotFound("k".into()), StatusCode::NOT_FOUND),
            (
                CoreError::Range {
                    start: 5,
                    end: 1,
                    available: 10,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                CoreError::UnresolvedChannels(vec!["FP1-O2".into()]),
                StatusCode::BAD_REQUEST,
            ),
            (
                CoreError::Timeout {
                    session_id: "s".into(),
                    seconds: 10.0,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                CoreError::UnsupportedFormat("vhdr".into()),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (
                CoreError::CorruptFile("short".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_and_code().0, expected);
        }
    }
}
