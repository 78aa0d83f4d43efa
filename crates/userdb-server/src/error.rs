//! Server error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use userdb_proto::{error_codes, ErrorResponse};

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] userdb_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the change distribution layer.
///
/// A client that simply went away is not an error; sessions report it as
/// [`CloseCause::TransportClosed`](crate::watch::CloseCause::TransportClosed).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// A subscriber with this id is already registered.
    #[error("subscriber {0} is already registered")]
    DuplicateSubscriber(String),

    /// Writing to the client failed.
    #[error("transport send failed: {0}")]
    TransportSendFailed(String),

    /// The change source failed or ended.
    #[error("upstream change source unavailable: {0}")]
    UpstreamUnavailable(String),
}

/// Error returned from HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Request failed validation.
    Validation(String),
    /// Malformed identifier.
    InvalidArgument(String),
    /// User not found.
    NotFound(String),
    /// Email already taken.
    AlreadyExists(String),
    /// Anything else. The message is logged, not returned.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, error_codes::VALIDATION, msg),
            ApiError::InvalidArgument(msg) => {
                (StatusCode::BAD_REQUEST, error_codes::INVALID_ARGUMENT, msg)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND, msg),
            ApiError::AlreadyExists(msg) => {
                (StatusCode::CONFLICT, error_codes::ALREADY_EXISTS, msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_codes::INTERNAL,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

impl From<userdb_core::Error> for ApiError {
    fn from(err: userdb_core::Error) -> Self {
        use userdb_core::Error as CoreError;

        match err {
            CoreError::Validation(_) => ApiError::Validation(err.to_string()),
            CoreError::InvalidId(_) => ApiError::InvalidArgument(err.to_string()),
            CoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            CoreError::AlreadyExists(_) => ApiError::AlreadyExists(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {}", err))
    }
}
