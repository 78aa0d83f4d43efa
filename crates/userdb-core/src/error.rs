//! Core error types.

use thiserror::Error;

/// Core store and service errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The identifier is not a valid user id.
    #[error("invalid user id: {0}")]
    InvalidId(String),

    /// User not found.
    #[error("user {0} not found")]
    NotFound(String),

    /// Another user already owns this email.
    #[error("user with email {0} already exists")]
    AlreadyExists(String),

    /// Request payload failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),

    /// The store's change feed ended.
    #[error("change feed closed")]
    FeedClosed,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
