//! Postgres adapter for the identity and profile stores.
//!
//! Email uniqueness is the `identities_email_key` constraint; the insert
//! and update paths translate its violation (SQLSTATE 23505) into
//! [`StoreError::Duplicate`] so the services never read-then-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{IdentityStore, ProfileStore, StoreError};
use crate::{Identity, LoginType, Profile};

/// SQLSTATE for unique-constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

/// Identity store on a Postgres pool.
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

/// Profile store on a Postgres pool.
#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgIdentityStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PgProfileStore {
    /// Create a store over the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Create the backing tables if they do not exist yet.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS identities (
            id UUID PRIMARY KEY,
            email TEXT NOT NULL,
            username TEXT NOT NULL,
            password_digest TEXT,
            login_type TEXT NOT NULL,
            email_verified BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL,
            CONSTRAINT identities_email_key UNIQUE (email)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS profiles (
            id UUID PRIMARY KEY,
            username TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: Uuid,
    email: String,
    username: String,
    password_digest: Option<String>,
    login_type: String,
    email_verified: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = StoreError;

    fn try_from(row: IdentityRow) -> Result<Self, StoreError> {
        let login_type: LoginType = row
            .login_type
            .parse()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("unknown login type in storage")))?;
        Ok(Self {
            id: row.id,
            email: row.email,
            username: row.username,
            password_digest: row.password_digest,
            login_type,
            email_verified: row.email_verified,
            created_at: row.created_at,
        })
    }
}

fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StoreError::Duplicate;
        }
    }
    StoreError::Backend(err.into())
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn insert(&self, identity: &Identity) -> Result<(), StoreError> {
        debug!(id = %identity.id, "INSERT identity");
        sqlx::query(
            "INSERT INTO identities
                 (id, email, username, password_digest, login_type, email_verified, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(identity.id)
        .bind(&identity.email)
        .bind(&identity.username)
        .bind(&identity.password_digest)
        .bind(identity.login_type.as_str())
        .bind(identity.email_verified)
        .bind(identity.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>("SELECT * FROM identities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.map(Identity::try_from).transpose()
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>("SELECT * FROM identities WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.map(Identity::try_from).transpose()
    }

    async fn update(&self, identity: &Identity) -> Result<(), StoreError> {
        debug!(id = %identity.id, "UPDATE identity");
        sqlx::query(
            "UPDATE identities
             SET email = $2, username = $3, password_digest = $4, email_verified = $5
             WHERE id = $1",
        )
        .bind(identity.id)
        .bind(&identity.email)
        .bind(&identity.username)
        .bind(&identity.password_digest)
        .bind(identity.email_verified)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        debug!(id = %id, "DELETE identity");
        sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn insert(&self, profile: &Profile) -> Result<(), StoreError> {
        debug!(id = %profile.id, "INSERT profile");
        sqlx::query("INSERT INTO profiles (id, username) VALUES ($1, $2)")
            .bind(profile.id)
            .bind(&profile.username)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        debug!(id = %id, "DELETE profile");
        sqlx::query("DELETE FROM profiles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }
}
