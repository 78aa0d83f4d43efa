//! Service layer: validation and hashing in front of the store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};
use userdb_proto::{NewUser, UpdateUser, User, UserQuery};
use validator::Validate;

use crate::error::Error;
use crate::feed::ChangeFeed;
use crate::password::{hash_password, verify_password, DEFAULT_COST};
use crate::storage::UserStore;

/// User operations as exposed to the API.
///
/// Every call is blocking: bcrypt and sled both do work on the calling
/// thread. Async callers should run these on a blocking pool.
#[derive(Clone)]
pub struct UserService {
    store: Arc<UserStore>,
    password_cost: u32,
}

impl UserService {
    /// Create a service over a store with the default bcrypt cost.
    pub fn new(store: Arc<UserStore>) -> Self {
        Self {
            store,
            password_cost: DEFAULT_COST,
        }
    }

    /// Override the bcrypt cost.
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<UserStore> {
        &self.store
    }

    /// Validate, hash and store a new user.
    #[instrument(skip(self), fields(email = %new_user.email))]
    pub fn add_user(&self, new_user: NewUser) -> Result<User, Error> {
        info!("adding a new user");
        new_user.validate()?;

        let hash = hash_password(&new_user.password, self.password_cost)?;
        self.store.insert(&new_user, hash)
    }

    /// Apply a partial update to a user.
    #[instrument(skip(self, changes))]
    pub fn update_user(&self, id: &str, changes: UpdateUser) -> Result<User, Error> {
        info!(?changes, "updating user");
        changes.validate()?;

        let hash = changes
            .password
            .as_deref()
            .map(|password| hash_password(password, self.password_cost))
            .transpose()?;
        self.store.update(id, &changes, hash)
    }

    /// Fetch one user.
    pub fn get_user(&self, id: &str) -> Result<User, Error> {
        self.store.get(id)
    }

    /// Delete one user.
    #[instrument(skip(self))]
    pub fn delete_user(&self, id: &str) -> Result<(), Error> {
        info!("deleting user");
        self.store.delete(id)
    }

    /// List users matching the query.
    pub fn list_users(&self, query: &UserQuery) -> Result<Vec<User>, Error> {
        self.store.list(query)
    }

    /// Check a user's password.
    pub fn check_password(&self, id: &str, password: &str) -> Result<bool, Error> {
        let record = self.store.record(id)?;
        verify_password(password, &record.password_hash)
    }

    /// Start a change feed over the store.
    pub fn watch(&self, poll_interval: Duration) -> Result<ChangeFeed, Error> {
        ChangeFeed::start(&self.store, poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;

    fn service() -> UserService {
        let store = UserStore::open(StorageConfig::temporary()).unwrap();
        UserService::new(Arc::new(store)).with_password_cost(4)
    }

    fn new_user() -> NewUser {
        NewUser {
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            nickname: "amazing".into(),
            email: "grace@example.com".into(),
            password: "cobol1959".into(),
            country: "US".into(),
        }
    }

    #[test]
    fn test_add_user_hashes_password() {
        let service = service();
        let user = service.add_user(new_user()).unwrap();

        let record = service.store().record(&user.id).unwrap();
        assert_ne!(record.password_hash, "cobol1959");
        assert!(service.check_password(&user.id, "cobol1959").unwrap());
    }

    #[test]
    fn test_add_user_validation() {
        let service = service();
        let invalid = NewUser {
            email: "grace".into(),
            ..new_user()
        };

        assert!(matches!(service.add_user(invalid), Err(Error::Validation(_))));
        assert_eq!(service.store().count(), 0);
    }

    #[test]
    fn test_update_password() {
        let service = service();
        let user = service.add_user(new_user()).unwrap();

        let changes = UpdateUser {
            password: Some("fortran1957".into()),
            ..Default::default()
        };
        service.update_user(&user.id, changes).unwrap();

        assert!(service.check_password(&user.id, "fortran1957").unwrap());
        assert!(!service.check_password(&user.id, "cobol1959").unwrap());
    }

    #[test]
    fn test_update_rejects_short_password() {
        let service = service();
        let user = service.add_user(new_user()).unwrap();

        let changes = UpdateUser {
            password: Some("short".into()),
            ..Default::default()
        };
        assert!(matches!(
            service.update_user(&user.id, changes),
            Err(Error::Validation(_))
        ));
    }
}
