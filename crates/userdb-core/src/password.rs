//! Password hashing.

use crate::error::Error;

/// Default bcrypt cost.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Hash a plain-text password.
pub fn hash_password(password: &str, cost: u32) -> Result<String, Error> {
    Ok(bcrypt::hash(password, cost)?)
}

/// Check a plain-text password against a stored hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, Error> {
    Ok(bcrypt::verify(password, hash)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("hunter22", 4).unwrap();
        assert_ne!(hash, "hunter22");
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("hunter23", &hash).unwrap());
    }

    #[test]
    fn test_invalid_cost() {
        assert!(matches!(hash_password("hunter22", 2), Err(Error::Hashing(_))));
    }
}
