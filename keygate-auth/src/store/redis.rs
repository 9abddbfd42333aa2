//! Redis adapter for the expiring keyed store.
//!
//! `take` maps onto `GETDEL`, which is what makes token redemption
//! single-winner across processes: the server removes the key in the same
//! command that returns it.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::{ExpiringStore, StoreError};

/// Expiring store on a Redis connection.
#[derive(Clone)]
pub struct RedisExpiringStore {
    conn: ConnectionManager,
}

impl RedisExpiringStore {
    /// Wrap an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Connect to a Redis endpoint (`redis://host:port`).
    ///
    /// # Errors
    ///
    /// Returns the underlying client error if the endpoint is invalid or
    /// unreachable.
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }
}

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.into())
}

#[async_trait]
impl ExpiringStore for RedisExpiringStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        debug!(key = %key, ttl = ?ttl, "SETEX");
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(backend)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        debug!(key = %key, "GET");
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(backend)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        debug!(key = %key, "GETDEL");
        let mut conn = self.conn.clone();
        conn.get_del(key).await.map_err(backend)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        debug!(key = %key, "DEL");
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(backend)
    }
}
