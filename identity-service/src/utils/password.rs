use argon2::{
    password_hash::{
        self, rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};

use crate::config::PasswordConfig;
use crate::services::ServiceError;

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Newtype for password hash
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Argon2id hasher with tunable cost.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new(config: &PasswordConfig) -> Result<Self, ServiceError> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| ServiceError::HashingError(format!("Invalid Argon2 parameters: {}", e)))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash a password with a freshly generated salt.
    ///
    /// Two calls with the same password produce different PHC strings.
    pub fn hash(&self, password: &Password) -> Result<PasswordHashString, ServiceError> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2
            .hash_password(password.as_str().as_bytes(), &salt)
            .map_err(|e| ServiceError::HashingError(format!("Failed to hash password: {}", e)))?
            .to_string();

        Ok(PasswordHashString::new(password_hash))
    }

    /// Verify a password against a stored hash.
    ///
    /// Returns `Ok(false)` on mismatch. Only a malformed stored hash is an
    /// error. Parameters embedded in the PHC string take precedence, so hashes
    /// made under an older cost setting still verify.
    pub fn verify(
        &self,
        password_hash: &PasswordHashString,
        password: &Password,
    ) -> Result<bool, ServiceError> {
        let parsed_hash = PasswordHash::new(password_hash.as_str()).map_err(|e| {
            ServiceError::HashingError(format!("Invalid password hash format: {}", e))
        })?;

        match self
            .argon2
            .verify_password(password.as_str().as_bytes(), &parsed_hash)
        {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(ServiceError::HashingError(format!(
                "Password verification failed: {}",
                e
            ))),
        }
    }
}
