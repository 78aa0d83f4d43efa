//! Storage layer for userdb.
//!
//! Users are kept in sled; records are encoded with rkyv.

mod config;
mod engine;
mod record;

pub mod key;

pub use config::StorageConfig;
pub use engine::UserStore;
pub(crate) use engine::user_id_from_key;
pub use record::UserRecord;
