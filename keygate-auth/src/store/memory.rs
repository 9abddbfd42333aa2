//! In-memory store implementations.
//!
//! Process-local, thread-safe, TTL-aware. These back the test suite and
//! single-node deployments that do not want external infrastructure.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{ExpiringStore, IdentityStore, ProfileStore, StoreError};
use crate::{Identity, Profile};

/// Identity store on a pair of maps: records by id, email index by email.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    records: DashMap<Uuid, Identity>,
    emails: DashMap<String, Uuid>,
}

impl MemoryIdentityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn insert(&self, identity: &Identity) -> Result<(), StoreError> {
        // The email index entry doubles as the uniqueness lock: whichever
        // racing insert claims the vacant entry wins.
        match self.emails.entry(identity.email.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(StoreError::Duplicate),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(identity.id);
            }
        }
        self.records.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(self.records.get(&id).map(|entry| entry.clone()))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let Some(id) = self.emails.get(email).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self.records.get(&id).map(|entry| entry.clone()))
    }

    async fn update(&self, identity: &Identity) -> Result<(), StoreError> {
        let previous_email = self
            .records
            .get(&identity.id)
            .map(|entry| entry.email.clone())
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("update of missing identity")))?;

        if previous_email != identity.email {
            match self.emails.entry(identity.email.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => return Err(StoreError::Duplicate),
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(identity.id);
                }
            }
            self.emails.remove(&previous_email);
        }

        self.records.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        if let Some((_, identity)) = self.records.remove(&id) {
            self.emails.remove(&identity.email);
        }
        Ok(())
    }
}

/// Profile store on a single map keyed by identity id.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    records: DashMap<Uuid, Profile>,
}

impl MemoryProfileStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn insert(&self, profile: &Profile) -> Result<(), StoreError> {
        self.records.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        self.records.remove(&id);
        Ok(())
    }
}

/// Expiring value store on a map of value + deadline pairs.
#[derive(Debug, Default)]
pub struct MemoryExpiringStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryExpiringStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry, returning how many were removed.
    ///
    /// Reads already treat expired entries as absent; this reclaims the
    /// memory on long-running processes.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, deadline)| *deadline > now);
        before - self.entries.len()
    }
}

#[async_trait]
impl ExpiringStore for MemoryExpiringStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let deadline = Instant::now() + ttl;
        self.entries
            .insert(key.to_owned(), (value.to_owned(), deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).and_then(|entry| {
            let (value, deadline) = entry.value();
            (*deadline > Instant::now()).then(|| value.clone())
        }))
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        // DashMap::remove is atomic: concurrent takers race for the entry
        // and at most one receives it.
        Ok(self.entries.remove(key).and_then(|(_, (value, deadline))| {
            (deadline > Instant::now()).then_some(value)
        }))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
