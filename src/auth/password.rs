//! Password hashing with Argon2id.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::config::PasswordHashingConfig;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("invalid argon2 parameters: {0}")]
    InvalidParams(String),
    #[error("failed to hash password: {0}")]
    Hashing(String),
}

/// A password on the write path. The caller states whether the value still
/// needs hashing; it is never guessed from the string's shape.
#[derive(Clone)]
pub enum Password {
    Plaintext(String),
    Hashed(String),
}

impl Password {
    pub fn into_hash(self, service: &PasswordService) -> Result<String, PasswordError> {
        match self {
            Password::Plaintext(plain) => service.hash(&plain),
            Password::Hashed(hash) => Ok(hash),
        }
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Password::Plaintext(_) => f.write_str("Password::Plaintext(..)"),
            Password::Hashed(_) => f.write_str("Password::Hashed(..)"),
        }
    }
}

/// Hashes and verifies passwords with the configured Argon2id cost
#[derive(Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
    /// Verified against when the account does not exist, so a login for an
    /// unknown email costs the same as one with a wrong password
    dummy_hash: String,
}

impl PasswordService {
    pub fn new(config: &PasswordHashingConfig) -> Result<Self, PasswordError> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| PasswordError::InvalidParams(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut service = Self {
            argon2,
            dummy_hash: String::new(),
        };
        service.dummy_hash = service.hash("dummy-password-for-timing")?;
        Ok(service)
    }

    /// Hash a password using Argon2id
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Verify a password against a stored hash. Unparsable hashes never match.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        let parsed_hash = match PasswordHash::new(hash) {
            Ok(h) => h,
            Err(_) => return false,
        };
        self.argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }

    /// Burn one verification for an account that does not exist
    pub fn verify_dummy(&self, password: &str) {
        let _ = self.verify(password, &self.dummy_hash);
    }
}
