//! Stored form of a user.

use chrono::{DateTime, Utc};
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use userdb_proto::{NewUser, UpdateUser, User};
use uuid::Uuid;

use crate::error::Error;

/// A user as persisted in the users tree.
///
/// `version` starts at 1 and grows by one on every update, which is how the
/// change feed tells an insert from an update.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct UserRecord {
    /// UUID bytes.
    pub id: [u8; 16],

    /// Write counter, 1 for a freshly created user.
    pub version: u64,

    /// Creation timestamp in microseconds since Unix epoch.
    pub created_at: i64,

    /// Last update timestamp in microseconds since Unix epoch.
    pub updated_at: i64,

    pub first_name: String,
    pub last_name: String,
    pub nickname: String,
    pub email: String,
    pub country: String,

    /// bcrypt hash of the password.
    pub password_hash: String,
}

impl UserRecord {
    /// Create the first version of a user.
    pub fn new(id: Uuid, fields: &NewUser, password_hash: String, now: i64) -> Self {
        Self {
            id: *id.as_bytes(),
            version: 1,
            created_at: now,
            updated_at: now,
            first_name: fields.first_name.clone(),
            last_name: fields.last_name.clone(),
            nickname: fields.nickname.clone(),
            email: fields.email.trim().to_string(),
            country: fields.country.clone(),
            password_hash,
        }
    }

    /// Produce the next version with the given changes applied.
    pub fn updated(&self, changes: &UpdateUser, password_hash: Option<String>, now: i64) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.updated_at = now;

        if let Some(first_name) = &changes.first_name {
            next.first_name = first_name.clone();
        }
        if let Some(last_name) = &changes.last_name {
            next.last_name = last_name.clone();
        }
        if let Some(nickname) = &changes.nickname {
            next.nickname = nickname.clone();
        }
        if let Some(email) = &changes.email {
            next.email = email.trim().to_string();
        }
        if let Some(country) = &changes.country {
            next.country = country.clone();
        }
        if let Some(hash) = password_hash {
            next.password_hash = hash;
        }

        next
    }

    /// The user's id.
    pub fn uuid(&self) -> Uuid {
        Uuid::from_bytes(self.id)
    }

    /// True for the first version of a user.
    pub fn is_new(&self) -> bool {
        self.version == 1
    }

    /// Client-facing view of this record.
    pub fn to_user(&self) -> User {
        User {
            id: self.uuid().to_string(),
            created_at: DateTime::<Utc>::from_timestamp_micros(self.created_at),
            updated_at: DateTime::<Utc>::from_timestamp_micros(self.updated_at),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            nickname: self.nickname.clone(),
            email: self.email.clone(),
            country: self.country.clone(),
        }
    }

    /// Serialize the record to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes using rkyv.
    ///
    /// sled hands back values without alignment guarantees, so the bytes are
    /// copied into an aligned buffer before validation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
