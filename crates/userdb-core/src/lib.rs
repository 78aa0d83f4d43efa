//! userdb core - user storage, change feed and the service layer.
//!
//! [`UserStore`] keeps users in sled. [`ChangeFeed`] turns sled's native
//! watch subscriber into a stream of [`ChangeEvent`]s, and [`UserService`]
//! validates and hashes before anything reaches the store.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod error;
pub mod feed;
pub mod password;
pub mod service;
pub mod storage;

pub use error::Error;
pub use feed::{ChangeFeed, DEFAULT_POLL_INTERVAL};
pub use service::UserService;
pub use storage::{StorageConfig, UserRecord, UserStore};

/// Re-export protocol types.
pub use userdb_proto as proto;
pub use userdb_proto::{ChangeEvent, ChangeType};
