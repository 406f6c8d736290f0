//! Node credential generation and verification.
//!
//! A node token is a random secret shown to the operator exactly once at
//! claim redemption or rotation; only its SHA-256 digest is stored.

use rand::RngExt;
use sha2::{Digest, Sha256};

const TOKEN_PREFIX: &str = "fnt_";
const TOKEN_LEN: usize = 40;

// Uppercase alphabet without 0/O/1/I, readable over the phone.
const KEY_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const KEY_LEN: usize = 6;

/// Generate a fresh node token (the plaintext secret).
pub fn generate_token() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    let secret: String = (0..TOKEN_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();
    format!("{TOKEN_PREFIX}{secret}")
}

/// Generate a stable human-legible node key, e.g. `nd-7FJK2Q`.
pub fn generate_node_key() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..KEY_LEN)
        .map(|_| {
            let idx = rng.random_range(0..KEY_CHARSET.len());
            KEY_CHARSET[idx] as char
        })
        .collect();
    format!("nd-{suffix}")
}

/// Digest a token for storage (we never store raw tokens).
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check a presented token against a stored digest.
pub fn verify_token(presented: &str, stored_hash: &str) -> bool {
    hash_token(presented) == stored_hash
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_is_deterministic() {
        let h1 = hash_token("same-token");
        let h2 = hash_token("same-token");
        assert_eq!(h1, h2);

        let h3 = hash_token("different-token");
        assert_ne!(h1, h3);
    }

    #[test]
    fn generated_tokens_verify_against_their_digest() {
        let token = generate_token();
        assert!(token.starts_with(TOKEN_PREFIX));

        let digest = hash_token(&token);
        assert!(verify_token(&token, &digest));
        assert!(!verify_token("fnt_wrong", &digest));
    }

    #[test]
    fn generated_tokens_are_distinct() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn node_keys_are_short_and_legible() {
        let key = generate_node_key();
        assert!(key.starts_with("nd-"));
        assert_eq!(key.len(), 3 + KEY_LEN);
        assert!(!key.contains('O') && !key.contains('0'));
    }
}
