//! Password hashing and verification.
//!
//! Argon2i with heavyweight parameters is the only algorithm used for new
//! credentials; PBKDF2-HMAC-SHA256 survives to verify digests created
//! before the switch. Which verifier runs is decided by the algorithm id
//! embedded in the stored digest, never by the caller, so a tampered or
//! confused caller cannot downgrade verification.
//!
//! Both operations are CPU-bound and run on the blocking thread pool
//! behind a bounded semaphore: a burst of logins queues instead of
//! starving unrelated request handling.

use std::sync::Arc;

use anyhow::anyhow;
use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHasher, PasswordVerifier, SaltString,
    },
    Argon2, Params,
};
use pbkdf2::Pbkdf2;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::config::PasswordConfig;
use crate::error::AuthError;
use crate::services::codec::{self, HashScheme};

/// Salt length in bytes, both algorithms.
const SALT_LEN: usize = 32;

/// Computes and verifies password digests.
#[derive(Debug, Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
    pbkdf2_params: pbkdf2::Params,
    permits: Arc<Semaphore>,
}

impl PasswordService {
    /// Build a service from configuration.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] if the configured Argon2
    /// parameters are rejected by the primitive.
    pub fn new(config: &PasswordConfig) -> Result<Self, AuthError> {
        let params = Params::new(
            config.memory_cost,
            config.time_cost,
            config.parallelism,
            Some(config.output_len),
        )
        .map_err(|e| AuthError::Internal(anyhow!("invalid argon2 parameters: {e}")))?;

        Ok(Self {
            argon2: Argon2::new(argon2::Algorithm::Argon2i, argon2::Version::V0x13, params),
            pbkdf2_params: pbkdf2::Params {
                rounds: config.pbkdf2_rounds,
                output_length: config.output_len,
            },
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
        })
    }

    /// Hash a password with the default algorithm.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] on primitive failure.
    pub async fn hash(&self, password: String) -> Result<String, AuthError> {
        self.hash_with(HashScheme::Argon2i, password).await
    }

    /// Hash a password with an explicitly chosen algorithm.
    ///
    /// The legacy algorithm is only for tooling that must mint
    /// backwards-compatible digests; new credentials go through [`hash`].
    ///
    /// [`hash`]: Self::hash
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] on primitive failure.
    pub async fn hash_with(
        &self,
        scheme: HashScheme,
        password: String,
    ) -> Result<String, AuthError> {
        let service = self.clone();
        self.run_blocking(move || service.hash_sync(scheme, &password))
            .await
    }

    /// Verify a password against a serialized digest record.
    ///
    /// Returns `false` for a well-formed record that does not match.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] if the stored record is corrupt
    /// or the primitive fails; neither is a "wrong password".
    pub async fn verify(&self, password: String, serialized: String) -> Result<bool, AuthError> {
        let service = self.clone();
        self.run_blocking(move || service.verify_sync(&password, &serialized))
            .await
    }

    async fn run_blocking<T, F>(&self, job: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AuthError::Internal(anyhow!("hashing pool closed")))?;
        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| AuthError::Internal(anyhow!("hashing task failed: {e}")))?
    }

    fn hash_sync(&self, scheme: HashScheme, password: &str) -> Result<String, AuthError> {
        let mut salt_bytes = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AuthError::Internal(anyhow!("salt encoding failed: {e}")))?;

        let record = match scheme {
            HashScheme::Argon2i => self.argon2.hash_password(password.as_bytes(), &salt),
            HashScheme::Pbkdf2Sha256 => Pbkdf2.hash_password_customized(
                password.as_bytes(),
                Some(pbkdf2::Algorithm::Pbkdf2Sha256.ident()),
                None,
                self.pbkdf2_params.clone(),
                &salt,
            ),
        }
        .map_err(|e| {
            error!(scheme = %scheme, "password hashing failed");
            AuthError::Internal(anyhow!("hashing primitive failed: {e}"))
        })?;

        Ok(codec::encode(&record))
    }

    fn verify_sync(&self, password: &str, serialized: &str) -> Result<bool, AuthError> {
        let (scheme, record) = codec::decode(serialized).map_err(|e| {
            error!("stored digest is unreadable");
            AuthError::Internal(anyhow!(e))
        })?;

        // Dispatch on the algorithm recorded in the digest. Both verifiers
        // replay the parameters embedded in the record and compare the
        // outputs in constant time.
        let outcome = match scheme {
            HashScheme::Argon2i => self.argon2.verify_password(password.as_bytes(), &record),
            HashScheme::Pbkdf2Sha256 => Pbkdf2.verify_password(password.as_bytes(), &record),
        };

        match outcome {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => {
                debug!(scheme = %scheme, "password mismatch");
                Ok(false)
            }
            Err(e) => Err(AuthError::Internal(anyhow!(
                "verification primitive failed: {e}"
            ))),
        }
    }
}
