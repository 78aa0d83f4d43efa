//! The user store.

use parking_lot::Mutex;
use sled::{Db, Transactional, Tree};
use tracing::debug;
use userdb_proto::{NewUser, UpdateUser, User, UserQuery};
use uuid::Uuid;

use super::key::{current_timestamp, decode_user_key, email_key, parse_user_id};
use super::{StorageConfig, UserRecord};
use crate::error::Error;

/// Tree name for user records.
const USERS_TREE: &str = "users";

/// Tree name for the email uniqueness index.
const EMAIL_INDEX_TREE: &str = "index:email";

/// sled-backed storage of users.
///
/// Users live in one tree keyed by their UUID bytes. A second tree maps the
/// normalized email to the owning id and enforces uniqueness.
pub struct UserStore {
    /// The underlying sled database.
    db: Db,

    /// Tree for user records.
    users: Tree,

    /// Tree for the email index (email -> user id).
    emails: Tree,

    /// Serializes check-then-write sequences on the email index.
    write_lock: Mutex<()>,
}

impl UserStore {
    /// Open or create a store with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let users = db.open_tree(USERS_TREE)?;
        let emails = db.open_tree(EMAIL_INDEX_TREE)?;

        Ok(Self {
            db,
            users,
            emails,
            write_lock: Mutex::new(()),
        })
    }

    /// Check if the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Insert a new user. The password must already be hashed.
    pub fn insert(&self, fields: &NewUser, password_hash: String) -> Result<User, Error> {
        let _guard = self.write_lock.lock();

        let email = email_key(&fields.email);
        if self.emails.contains_key(&email)? {
            return Err(Error::AlreadyExists(fields.email.trim().to_string()));
        }

        let id = Uuid::new_v4();
        let record = UserRecord::new(id, fields, password_hash, current_timestamp());
        let bytes = record.to_bytes()?;

        (&self.users, &self.emails)
            .transaction(|(users, emails)| {
                users.insert(&id.as_bytes()[..], bytes.as_slice())?;
                emails.insert(email.as_slice(), &id.as_bytes()[..])?;
                Ok::<_, sled::transaction::ConflictableTransactionError<()>>(())
            })
            .map_err(transaction_error)?;

        debug!(user_id = %id, "inserted user");
        Ok(record.to_user())
    }

    /// Get a user by id.
    pub fn get(&self, id: &str) -> Result<User, Error> {
        let uuid = parse_user_id(id)?;
        self.load(&uuid)
            .and_then(|record| record.ok_or_else(|| Error::NotFound(id.to_string())))
            .map(|record| record.to_user())
    }

    /// Apply a partial update. A new password must already be hashed.
    pub fn update(
        &self,
        id: &str,
        changes: &UpdateUser,
        password_hash: Option<String>,
    ) -> Result<User, Error> {
        let uuid = parse_user_id(id)?;
        let _guard = self.write_lock.lock();

        let current = self
            .load(&uuid)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let next = current.updated(changes, password_hash, current_timestamp());

        let old_email = email_key(&current.email);
        let new_email = email_key(&next.email);
        let email_changed = old_email != new_email;
        if email_changed && self.emails.contains_key(&new_email)? {
            return Err(Error::AlreadyExists(next.email.clone()));
        }

        let bytes = next.to_bytes()?;
        (&self.users, &self.emails)
            .transaction(|(users, emails)| {
                users.insert(&uuid.as_bytes()[..], bytes.as_slice())?;
                if email_changed {
                    emails.remove(old_email.as_slice())?;
                    emails.insert(new_email.as_slice(), &uuid.as_bytes()[..])?;
                }
                Ok::<_, sled::transaction::ConflictableTransactionError<()>>(())
            })
            .map_err(transaction_error)?;

        debug!(user_id = %uuid, version = next.version, "updated user");
        Ok(next.to_user())
    }

    /// Delete a user by id.
    pub fn delete(&self, id: &str) -> Result<(), Error> {
        let uuid = parse_user_id(id)?;
        let _guard = self.write_lock.lock();

        let current = self
            .load(&uuid)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let email = email_key(&current.email);

        (&self.users, &self.emails)
            .transaction(|(users, emails)| {
                users.remove(&uuid.as_bytes()[..])?;
                emails.remove(email.as_slice())?;
                Ok::<_, sled::transaction::ConflictableTransactionError<()>>(())
            })
            .map_err(transaction_error)?;

        debug!(user_id = %uuid, "deleted user");
        Ok(())
    }

    /// List users matching the query, newest first.
    pub fn list(&self, query: &UserQuery) -> Result<Vec<User>, Error> {
        let mut matched = Vec::new();
        for item in self.users.iter() {
            let (_, value) = item?;
            let user = UserRecord::from_bytes(&value)?.to_user();
            if query.matches(&user) {
                matched.push(user);
            }
        }

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.limit()).unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    /// Load the stored record for a user, including its password hash.
    pub fn record(&self, id: &str) -> Result<UserRecord, Error> {
        let uuid = parse_user_id(id)?;
        self.load(&uuid)?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Number of stored users.
    pub fn count(&self) -> usize {
        self.users.len()
    }

    /// Cheap read to confirm the store is usable.
    pub fn ping(&self) -> Result<(), Error> {
        self.users.first()?;
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    /// Subscribe to raw sled events on the users tree.
    pub(crate) fn subscribe(&self) -> sled::Subscriber {
        self.users.watch_prefix(Vec::<u8>::new())
    }

    fn load(&self, id: &Uuid) -> Result<Option<UserRecord>, Error> {
        match self.users.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(UserRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Hyphenated user id for a raw users-tree key.
pub(crate) fn user_id_from_key(key: &[u8]) -> Option<String> {
    decode_user_key(key).map(|id| id.to_string())
}

fn transaction_error(err: sled::transaction::TransactionError<()>) -> Error {
    match err {
        sled::transaction::TransactionError::Storage(e) => Error::Storage(e),
        sled::transaction::TransactionError::Abort(()) => {
            Error::Storage(sled::Error::Unsupported("transaction aborted".into()))
        }
    }
}
