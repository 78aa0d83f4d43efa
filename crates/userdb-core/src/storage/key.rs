//! Key encoding for the user trees.

use uuid::Uuid;

use crate::error::Error;

/// Size of a user key in bytes (UUID).
pub const USER_KEY_SIZE: usize = 16;

/// Parse a client supplied user id.
pub fn parse_user_id(id: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(id).map_err(|_| Error::InvalidId(id.to_string()))
}

/// Decode a user key read back from the users tree.
pub fn decode_user_key(bytes: &[u8]) -> Option<Uuid> {
    let bytes: [u8; USER_KEY_SIZE] = bytes.try_into().ok()?;
    Some(Uuid::from_bytes(bytes))
}

/// Key of the email index. Emails are compared case-insensitively.
pub fn email_key(email: &str) -> Vec<u8> {
    email.trim().to_lowercase().into_bytes()
}

/// Get the current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_user_id(&id.to_string()).unwrap(), id);

        let err = parse_user_id("not-a-uuid").unwrap_err();
        assert!(matches!(err, Error::InvalidId(ref s) if s == "not-a-uuid"));
    }

    #[test]
    fn test_decode_user_key() {
        let id = Uuid::new_v4();
        assert_eq!(decode_user_key(id.as_bytes()), Some(id));
        assert_eq!(decode_user_key(&[0u8; 10]), None);
    }

    #[test]
    fn test_email_key_is_case_insensitive() {
        assert_eq!(email_key("Alice@Example.com "), email_key("alice@example.com"));
    }

    #[test]
    fn test_current_timestamp_is_recent() {
        // 2020-01-01 in microseconds
        assert!(current_timestamp() > 1_577_836_800_000_000);
    }
}
