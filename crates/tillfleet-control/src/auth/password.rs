//! Operator password hashing and verification using argon2id.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use tracing::warn;

/// Hash a password for storage, argon2id with a random per-hash salt.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Check a login attempt against the stored hash.
///
/// A stored hash that fails to parse counts as a failed verification
/// rather than an error: login must not tell a corrupt row apart from a
/// wrong password.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        warn!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn verifies_the_original_password_only() {
        let hash = hash_password("drawer-count-42").unwrap();
        assert!(verify_password("drawer-count-42", &hash));
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn malformed_stored_hash_fails_closed() {
        assert!(!verify_password("anything", "not-a-phc-string"));
        assert!(!verify_password("anything", ""));
    }

    #[test]
    fn salts_make_equal_passwords_hash_differently() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }
}
