//! Password Verifier
//! Mission: Salted slow hashing for stored credentials

use crate::auth::error::AuthError;
use anyhow::Context;
use tracing::error;

/// bcrypt work factor used for stored credentials.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct PasswordVerifier {
    cost: u32,
}

impl Default for PasswordVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}

impl PasswordVerifier {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn hash(&self, plaintext: &str) -> Result<String, AuthError> {
        let hashed = bcrypt::hash(plaintext, self.cost).context("Failed to hash password")?;
        Ok(hashed)
    }

    /// A mismatch is `Ok(false)`; only an unparseable stored hash is an error.
    pub fn verify(&self, plaintext: &str, stored_hash: &str) -> Result<bool, AuthError> {
        bcrypt::verify(plaintext, stored_hash).map_err(|e| {
            error!(error = %e, "Stored password hash could not be parsed");
            AuthError::CorruptCredential
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let verifier = PasswordVerifier::new(4);
        let hash = verifier.hash("admin123").unwrap();

        assert!(hash.starts_with("$2"));
        assert!(verifier.verify("admin123", &hash).unwrap());
        assert!(!verifier.verify("wrongpassword", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let verifier = PasswordVerifier::new(4);
        let a = verifier.hash("same-password").unwrap();
        let b = verifier.hash("same-password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_corrupt_hash_is_distinct_failure() {
        let verifier = PasswordVerifier::new(4);
        let result = verifier.verify("admin123", "not-a-bcrypt-hash");
        assert!(matches!(result, Err(AuthError::CorruptCredential)));
    }
}
