//! Response envelopes for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::user::User;

/// Response carrying a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub user: User,
}

/// Response carrying a page of users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListUsersResponse {
    pub users: Vec<User>,
}

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeleteStatus {
    Ok,
}

/// Response for a delete call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteUserResponse {
    pub status: DeleteStatus,
}

impl DeleteUserResponse {
    pub fn ok() -> Self {
        Self {
            status: DeleteStatus::Ok,
        }
    }
}

/// Error details inside an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code, see [`error_codes`].
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Body of every non-2xx API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

impl ErrorResponse {
    /// Create an error response.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// Error codes for API responses.
pub mod error_codes {
    /// Unknown/internal error.
    pub const INTERNAL: &str = "INTERNAL_ERROR";
    /// Request failed validation.
    pub const VALIDATION: &str = "VALIDATION_FAILED";
    /// Identifier is malformed.
    pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
    /// User not found.
    pub const NOT_FOUND: &str = "NOT_FOUND";
    /// A user with the same email exists.
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
}
