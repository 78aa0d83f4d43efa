//! userdb protocol types.
//!
//! This crate defines the types shared by the store, the server and its
//! clients. Everything is JSON on the wire via serde.
//!
//! # Modules
//!
//! - [`user`] - User records and request payloads
//! - [`change`] - Change events and the watch stream frame
//! - [`message`] - Response envelopes and error codes
//! - [`error`] - Protocol error types

pub mod change;
pub mod error;
pub mod message;
pub mod user;

pub use error::Error;

// Re-export commonly used types at crate root
pub use change::{ChangeEvent, ChangeType, WatchFrame};
pub use message::{
    error_codes, DeleteStatus, DeleteUserResponse, ErrorBody, ErrorResponse, ListUsersResponse,
    UserResponse,
};
pub use user::{NewUser, UpdateUser, User, UserQuery, DEFAULT_PAGE_LIMIT};

/// Protocol version reported by the health endpoint.
///
/// Bump when the watch frame or response shapes change incompatibly.
pub const PROTOCOL_VERSION: u32 = 1;
