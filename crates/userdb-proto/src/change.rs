//! Change events and their wire frame.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::user::User;

/// Types of changes that can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    /// A new user was inserted.
    Insert,
    /// An existing user was updated.
    Update,
    /// A user was deleted.
    Delete,
}

impl ChangeType {
    /// Wire name of the change type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Insert => "INSERT",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        }
    }
}

/// One mutation observed on the user store.
///
/// Events are immutable once produced and are handed to every subscriber
/// independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The type of change.
    pub change_type: ChangeType,
    /// Snapshot of the user after the change. Deletes carry only the id.
    pub user: User,
}

impl ChangeEvent {
    /// Create an insert event.
    pub fn insert(user: User) -> Self {
        Self {
            change_type: ChangeType::Insert,
            user,
        }
    }

    /// Create an update event.
    pub fn update(user: User) -> Self {
        Self {
            change_type: ChangeType::Update,
            user,
        }
    }

    /// Create a delete event for the given user id.
    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Delete,
            user: User::id_only(id),
        }
    }
}

/// A change event as written to a watching client.
///
/// `seq` counts frames within one watch stream, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchFrame {
    pub seq: u64,
    pub change_type: ChangeType,
    pub user: User,
}

impl WatchFrame {
    /// Build the frame for the `seq`-th event of a stream.
    pub fn new(seq: u64, event: &ChangeEvent) -> Self {
        Self {
            seq,
            change_type: event.change_type,
            user: event.user.clone(),
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_text(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame.
    pub fn from_text(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }
}
