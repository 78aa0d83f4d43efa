//! User records and the request shapes that create, change and list them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Number of users returned by a list call when no limit is given.
pub const DEFAULT_PAGE_LIMIT: u64 = 30;

/// A user as seen by clients.
///
/// The password never leaves the store; only its hash is persisted and it is
/// not part of this type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier (UUID, hyphenated).
    pub id: String,
    /// When the user was created. Absent on delete snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the user was last changed. Absent on delete snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// First name.
    #[serde(default)]
    pub first_name: String,
    /// Last name.
    #[serde(default)]
    pub last_name: String,
    /// Display nickname.
    #[serde(default)]
    pub nickname: String,
    /// Email address, unique across users.
    #[serde(default)]
    pub email: String,
    /// Country code or name.
    #[serde(default)]
    pub country: String,
}

impl User {
    /// A snapshot carrying only the identifier, used for deletions.
    pub fn id_only(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// Payload for creating a user.
#[derive(Clone, Default, Serialize, Deserialize, Validate)]
pub struct NewUser {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub nickname: String,
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    /// Plain-text password, hashed before it reaches storage.
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    pub password: String,
    #[serde(default)]
    pub country: String,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("nickname", &self.nickname)
            .field("email", &self.email)
            .field("country", &self.country)
            .finish_non_exhaustive()
    }
}

/// Partial update for an existing user. `None` leaves a field unchanged.
#[derive(Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(email(message = "must be a valid email address"))]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl UpdateUser {
    /// True when no field would change.
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.nickname.is_none()
            && self.email.is_none()
            && self.password.is_none()
            && self.country.is_none()
    }
}

impl fmt::Debug for UpdateUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateUser")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("nickname", &self.nickname)
            .field("email", &self.email)
            .field("password_changed", &self.password.is_some())
            .field("country", &self.country)
            .finish()
    }
}

/// Filter and pagination for listing users.
///
/// Every present filter must match exactly. `page` is an offset into the
/// result set, which is ordered newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
}

impl UserQuery {
    /// Create an empty query matching every user.
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective page size.
    pub fn limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT)
    }

    /// Effective offset.
    pub fn offset(&self) -> u64 {
        self.page.unwrap_or(0)
    }

    /// Check whether a user passes every filter in this query.
    pub fn matches(&self, user: &User) -> bool {
        fn field_matches(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().map_or(true, |expected| expected == value)
        }

        field_matches(&self.first_name, &user.first_name)
            && field_matches(&self.last_name, &user.last_name)
            && field_matches(&self.nickname, &user.nickname)
            && field_matches(&self.country, &user.country)
            && field_matches(&self.email, &user.email)
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_new_user() -> NewUser {
        NewUser {
            first_name: "Alice".into(),
            last_name: "Smith".into(),
            nickname: "al".into(),
            email: "alice@example.com".into(),
            password: "correct horse".into(),
            country: "UK".into(),
        }
    }

    #[test]
    fn test_new_user_validation() {
        assert!(valid_new_user().validate().is_ok());

        let bad_email = NewUser {
            email: "not-an-email".into(),
            ..valid_new_user()
        };
        let errors = bad_email.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("email"));

        let short_password = NewUser {
            password: "short".into(),
            ..valid_new_user()
        };
        let errors = short_password.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("password"));
    }

    #[test]
    fn test_update_user_validation_skips_absent_fields() {
        let update = UpdateUser {
            nickname: Some("bob".into()),
            ..Default::default()
        };
        assert!(update.validate().is_ok());
        assert!(!update.is_empty());
        assert!(UpdateUser::default().is_empty());

        let update = UpdateUser {
            email: Some("nope".into()),
            ..Default::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", valid_new_user());
        assert!(!rendered.contains("correct horse"));
        assert!(rendered.contains("alice@example.com"));
    }

    #[test]
    fn test_query_defaults_and_matching() {
        let query = UserQuery::new();
        assert_eq!(query.limit(), DEFAULT_PAGE_LIMIT);
        assert_eq!(query.offset(), 0);

        let user = User {
            id: "1".into(),
            country: "SI".into(),
            email: "a@b.si".into(),
            ..Default::default()
        };
        assert!(query.matches(&user));
        assert!(UserQuery::new().with_country("SI").matches(&user));
        assert!(!UserQuery::new().with_country("DE").matches(&user));
        assert!(!UserQuery::new()
            .with_country("SI")
            .with_email("x@b.si")
            .matches(&user));
    }

    #[test]
    fn test_delete_snapshot_serializes_without_timestamps() {
        let json = serde_json::to_value(User::id_only("abc")).unwrap();
        assert_eq!(json["id"], "abc");
        assert!(json.get("created_at").is_none());
        assert!(json.get("updated_at").is_none());
    }
}
