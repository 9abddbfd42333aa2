//! Storage seams consumed by the authentication core.
//!
//! The core never talks to a backend directly: identities and profiles go
//! through keyed stores, sessions and one-time tokens through an expiring
//! keyed store. [`memory`] ships DashMap-backed implementations used by
//! tests and embedded deployments; [`postgres`] and [`redis`] are the
//! production adapters.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{Identity, Profile};

/// Failure surface shared by every store adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate key")]
    Duplicate,
    /// The backend failed or was unreachable.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Keyed store of authentication records, unique by email.
///
/// Uniqueness must be enforced by the store itself on insert and update;
/// callers rely on [`StoreError::Duplicate`] instead of a read-then-write
/// check, so two racing inserts cannot both succeed.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a new identity. Fails `Duplicate` if the email is taken.
    async fn insert(&self, identity: &Identity) -> Result<(), StoreError>;

    /// Fetch by id.
    async fn get(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    /// Fetch by email.
    async fn get_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError>;

    /// Replace the stored record. Fails `Duplicate` if an email change
    /// collides with another identity.
    async fn update(&self, identity: &Identity) -> Result<(), StoreError>;

    /// Remove by id. Removing an absent id is not an error.
    async fn remove(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Keyed store of profile records, parallel to the identity store.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Insert a new profile.
    async fn insert(&self, profile: &Profile) -> Result<(), StoreError>;

    /// Remove by identity id. Removing an absent id is not an error.
    async fn remove(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Expiring keyed value store backing sessions and one-time tokens.
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    /// Set `key` to `value`, overwriting, expiring after `ttl`.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Read without consuming.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically read and delete. Of two concurrent takers at most one
    /// observes the value; this is the single-use guarantee one-time
    /// tokens are built on.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete. Deleting an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
