//! Credential hashing and random token generation
//!
//! Passwords are hashed with Argon2id; the PHC string embeds the algorithm,
//! parameters and salt so the work factor can be raised without invalidating
//! existing hashes.

use anyhow::Result;
use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use std::sync::Arc;
use tracing::warn;

/// Number of random bytes behind every opaque token (verification, reset, session).
pub const TOKEN_BYTES: usize = 32;

/// Argon2 work factor configuration
#[derive(Debug, Clone)]
pub struct HasherConfig {
    /// Memory cost in KiB (default: 19456)
    pub memory_kib: u32,
    /// Number of passes (default: 2)
    pub iterations: u32,
    /// Degree of parallelism (default: 1)
    pub parallelism: u32,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl HasherConfig {
    /// Create a new HasherConfig from environment variables
    ///
    /// # Environment Variables
    /// - `PASSWORD_HASH_MEMORY_KIB`: memory cost (default: 19456)
    /// - `PASSWORD_HASH_ITERATIONS`: time cost (default: 2)
    /// - `PASSWORD_HASH_PARALLELISM`: lanes (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |key: &str, default: u32| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        Self {
            memory_kib: read("PASSWORD_HASH_MEMORY_KIB", defaults.memory_kib),
            iterations: read("PASSWORD_HASH_ITERATIONS", defaults.iterations),
            parallelism: read("PASSWORD_HASH_PARALLELISM", defaults.parallelism),
        }
    }
}

/// One-way password hasher.
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    /// Hash of a random secret under the same parameters, checked when there
    /// is no stored hash to compare against
    decoy: Arc<str>,
}

impl CredentialHasher {
    /// Build a hasher, rejecting parameters Argon2 considers invalid.
    pub fn new(config: &HasherConfig) -> Result<Self> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid password hashing parameters: {}", e))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let salt = SaltString::generate(&mut rand::thread_rng());
        let decoy = argon2
            .hash_password(generate_secure_token().as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to prepare decoy hash: {}", e))?
            .to_string();

        Ok(Self {
            argon2,
            decoy: decoy.into(),
        })
    }

    /// Hash a plaintext password with a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut rand::thread_rng());
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

        Ok(hash.to_string())
    }

    /// Check a plaintext password against a stored hash.
    ///
    /// A malformed hash is reported as a mismatch.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                warn!(error = %e, "Stored password hash is malformed");
                false
            }
        }
    }

    /// Spend one full verification on the decoy hash. Always `false`.
    pub fn verify_decoy(&self, password: &str) -> bool {
        self.verify(password, &self.decoy);
        false
    }
}

/// Cryptographically random, URL-safe, unpadded token.
pub fn generate_secure_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
