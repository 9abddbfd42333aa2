//! Session establishment, regeneration, and teardown.
//!
//! Sessions are JSON records in the expiring keyed store under
//! `sess:<id>`. Login never reuses the inbound session id: a replacement
//! session with a fresh id (and fresh CSRF token) is persisted first, the
//! principal rides on the replacement, and only then is the old id
//! deleted. An attacker who pre-planted a session id therefore holds a
//! dead credential the moment the victim authenticates.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::AuthError;
use crate::store::ExpiringStore;
use crate::{Principal, Session};

const SESSION_PREFIX: &str = "sess";

/// Creates, loads, regenerates, and destroys sessions.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn ExpiringStore>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a manager over the given expiring store.
    #[must_use]
    pub fn new(store: Arc<dyn ExpiringStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    fn key(session_id: &str) -> String {
        format!("{SESSION_PREFIX}:{session_id}")
    }

    async fn persist(&self, session: &Session) -> Result<(), AuthError> {
        let payload = serde_json::to_string(session)
            .map_err(|e| AuthError::Internal(anyhow!("session encoding failed: {e}")))?;
        self.store
            .put(
                &Self::key(&session.session_id),
                &payload,
                Duration::from_secs(self.config.ttl_seconds),
            )
            .await?;
        Ok(())
    }

    /// Open a fresh anonymous session.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] if the store write fails.
    pub async fn open(&self) -> Result<Session, AuthError> {
        let session = Session::new(self.config.ttl_seconds);
        self.persist(&session).await?;
        debug!(session = %session.session_id, "opened session");
        Ok(session)
    }

    /// Load a session by id. Absent and expired both read as `None`.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] on store failure or a corrupt
    /// record.
    pub async fn load(&self, session_id: &str) -> Result<Option<Session>, AuthError> {
        let Some(payload) = self.store.get(&Self::key(session_id)).await? else {
            return Ok(None);
        };
        let session: Session = serde_json::from_str(&payload)
            .map_err(|e| AuthError::Internal(anyhow!("session decoding failed: {e}")))?;
        if session.is_expired() {
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Save mutated non-auth data back to the store.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] if the store write fails.
    pub async fn save(&self, session: &Session) -> Result<(), AuthError> {
        self.persist(session).await
    }

    /// Attach a principal under a brand-new session id.
    ///
    /// Non-auth data from the caller's current session (if any) carries
    /// over; the id and CSRF token do not. The replacement is persisted
    /// before the old id is invalidated, and any failure along the way
    /// fails the login rather than falling back to the old id.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] if any store operation fails.
    pub async fn login(
        &self,
        current_id: Option<&str>,
        principal: Principal,
    ) -> Result<Session, AuthError> {
        let carried = match current_id {
            Some(id) => self
                .load(id)
                .await?
                .map(|session| session.data)
                .unwrap_or_default(),
            None => std::collections::HashMap::new(),
        };

        let mut replacement = Session::new(self.config.ttl_seconds);
        replacement.data = carried;
        replacement.principal = Some(principal);

        self.persist(&replacement).await?;

        if let Some(old_id) = current_id {
            if let Err(e) = self.store.remove(&Self::key(old_id)).await {
                // The new session exists but the old id is still live, so
                // fixation protection does not hold. Tear down and fail.
                warn!(session = %old_id, "could not invalidate pre-login session");
                let _ = self.store.remove(&Self::key(&replacement.session_id)).await;
                return Err(e.into());
            }
        }

        debug!(session = %replacement.session_id, "session regenerated on login");
        Ok(replacement)
    }

    /// Destroy a session entirely.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] if the store delete fails.
    pub async fn destroy(&self, session_id: &str) -> Result<(), AuthError> {
        self.store.remove(&Self::key(session_id)).await?;
        debug!(session = %session_id, "session destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryExpiringStore;
    use uuid::Uuid;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(MemoryExpiringStore::new()), SessionConfig::default())
    }

    fn principal() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            email: "a@x.com".to_owned(),
        }
    }

    #[tokio::test]
    async fn open_then_load_round_trips() {
        let manager = manager();
        let session = manager.open().await.unwrap();
        let loaded = manager.load(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(loaded.csrf_token, session.csrf_token);
        assert!(!loaded.is_authenticated());
    }

    #[tokio::test]
    async fn login_rotates_the_session_id() {
        let manager = manager();
        let mut anonymous = manager.open().await.unwrap();
        anonymous
            .data
            .insert("locale".to_owned(), "de-DE".to_owned());
        manager.save(&anonymous).await.unwrap();

        let authenticated = manager
            .login(Some(&anonymous.session_id), principal())
            .await
            .unwrap();

        assert_ne!(authenticated.session_id, anonymous.session_id);
        assert_ne!(authenticated.csrf_token, anonymous.csrf_token);
        assert!(authenticated.is_authenticated());
        // Non-auth data survives the rotation.
        assert_eq!(authenticated.data.get("locale").map(String::as_str), Some("de-DE"));
        // The pre-login id is dead.
        assert!(manager.load(&anonymous.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn login_without_a_prior_session_works() {
        let manager = manager();
        let session = manager.login(None, principal()).await.unwrap();
        assert!(session.is_authenticated());
        assert!(manager.load(&session.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn logout_destroys_the_record() {
        let manager = manager();
        let session = manager.login(None, principal()).await.unwrap();
        manager.destroy(&session.session_id).await.unwrap();
        assert!(manager.load(&session.session_id).await.unwrap().is_none());
    }
}
