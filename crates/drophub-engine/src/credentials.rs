//! # Credential Store
//!
//! Device token generation, hashing and verification.
//!
//! ## Why Argon2
//! Device tokens are bearer secrets: anyone holding one can impersonate
//! the device. They are therefore stored only as argon2 PHC strings - a
//! database leak yields no usable credentials - and verification goes
//! through the password-hash API, whose digest comparison is constant
//! time. Token guessing learns nothing from response timing.
//!
//! ## Contract
//! - Pure read: verification never mutates anything. Whether a failed
//!   verification gets logged, rate-limited, or refused a `last_seen`
//!   update is entirely the coordinator's business.
//! - Tokens are provisioned out of band (admin registration or the config
//!   allowlist) and are never derived from device-supplied data.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordVerifier};
use tracing::warn;
use uuid::Uuid;

use crate::error::{HubError, HubResult};

/// Hashes and verifies device credentials.
#[derive(Default)]
pub struct CredentialStore {
    hasher: Argon2<'static>,
}

impl CredentialStore {
    /// Creates a credential store with default argon2 parameters.
    pub fn new() -> Self {
        CredentialStore {
            hasher: Argon2::default(),
        }
    }

    /// Generates a fresh device token.
    ///
    /// Returned to the admin exactly once at registration; the hub only
    /// keeps the hash.
    pub fn generate_token(&self) -> String {
        // Two UUIDv4s = 244 bits of randomness in urlsafe hex
        format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
    }

    /// Hashes a token for storage.
    pub fn hash_token(&self, token: &str) -> HubResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .hasher
            .hash_password(token.as_bytes(), &salt)
            .map_err(|e| HubError::InvalidConfig(format!("credential hashing failed: {e}")))?;
        Ok(hash.to_string())
    }

    /// Verifies a presented token against a stored PHC string.
    ///
    /// Returns `false` for a mismatch. A malformed stored hash also
    /// verifies as `false` (and logs): corrupt credentials must fail
    /// closed, not open.
    pub fn verify(&self, stored_hash: &str, presented: &str) -> bool {
        let parsed = match PasswordHash::new(stored_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(?e, "Stored credential hash is malformed; rejecting");
                return false;
            }
        };

        self.hasher
            .verify_password(presented.as_bytes(), &parsed)
            .is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_round_trip() {
        let store = CredentialStore::new();
        let token = store.generate_token();
        let hash = store.hash_token(&token).unwrap();

        assert!(store.verify(&hash, &token));
        assert!(!store.verify(&hash, "wrong-token"));
    }

    #[test]
    fn test_tokens_are_unique_and_hashes_salted() {
        let store = CredentialStore::new();
        let a = store.generate_token();
        let b = store.generate_token();
        assert_ne!(a, b);

        // Same token, different salt, different PHC string
        let h1 = store.hash_token(&a).unwrap();
        let h2 = store.hash_token(&a).unwrap();
        assert_ne!(h1, h2);
        assert!(store.verify(&h1, &a));
        assert!(store.verify(&h2, &a));
    }

    #[test]
    fn test_malformed_hash_fails_closed() {
        let store = CredentialStore::new();
        assert!(!store.verify("not-a-phc-string", "anything"));
        assert!(!store.verify("", "anything"));
    }
}
