//! Identity reconciliation across local and federated logins.
//!
//! Owns the per-identity state machine: a local identity is created
//! unverified and stays local forever; a federated identity is created on
//! first successful provider login and stays federated forever. Password
//! and email changes are local-only operations.
//!
//! Identity and profile rows live in two independently-failing stores, so
//! creation and deletion are compensated rather than assumed atomic: a
//! failed profile write rolls the identity back, and a failed cleanup is
//! queued for the orphan sweeper instead of being swallowed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AuthError;
use crate::services::password::PasswordService;
use crate::store::{IdentityStore, ProfileStore, StoreError};
use crate::{Identity, LoginType, Profile};

/// Normalized profile data returned by a federated provider.
#[derive(Debug, Clone)]
pub struct SocialProfile {
    /// Display name asserted by the provider.
    pub username: String,
    /// Email address asserted by the provider.
    pub email: String,
}

/// A federated login provider strategy.
///
/// Implementations exchange a provider-specific access token for the
/// subject's profile. The service holds them in an explicit table injected
/// at construction, so tests substitute doubles instead of talking to
/// Facebook or Google.
#[async_trait]
pub trait SocialProvider: Send + Sync {
    /// Which login type this provider reconciles into.
    fn login_type(&self) -> LoginType;

    /// Resolve the access token into the subject's profile.
    async fn fetch_profile(&self, access_token: &str) -> Result<SocialProfile, AuthError>;
}

/// Identity and profile rows left behind by partial failures, retried by
/// [`IdentityService::sweep_orphans`].
#[derive(Debug, Default)]
struct OrphanQueue {
    /// Profile rows whose identity is already gone.
    profiles: DashSet<Uuid>,
    /// Identity rows whose compensating delete failed.
    identities: DashSet<Uuid>,
}

/// The identity reconciliation service.
pub struct IdentityService {
    identities: Arc<dyn IdentityStore>,
    profiles: Arc<dyn ProfileStore>,
    passwords: PasswordService,
    providers: HashMap<LoginType, Arc<dyn SocialProvider>>,
    orphans: OrphanQueue,
}

impl IdentityService {
    /// Assemble the service from its collaborators.
    #[must_use]
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        profiles: Arc<dyn ProfileStore>,
        passwords: PasswordService,
        providers: Vec<Arc<dyn SocialProvider>>,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| (provider.login_type(), provider))
            .collect();
        Self {
            identities,
            profiles,
            passwords,
            providers,
            orphans: OrphanQueue::default(),
        }
    }

    /// Register a new local identity.
    ///
    /// The password is hashed with the default algorithm; the identity
    /// starts unverified. The email-uniqueness decision is the store's
    /// insert, not a prior read, so two racing registrations cannot both
    /// succeed.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Conflict`] if the email is taken, and
    /// [`AuthError::Internal`] on store or hashing failure.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: String,
    ) -> Result<Identity, AuthError> {
        let digest = self.passwords.hash(password).await?;
        let identity = Identity {
            id: Uuid::new_v4(),
            email: email.to_owned(),
            username: username.to_owned(),
            password_digest: Some(digest),
            login_type: LoginType::Local,
            email_verified: false,
            created_at: Utc::now(),
        };
        self.create_with_profile(identity).await
    }

    /// Authenticate a local identity by email and password.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::WrongCredentials`] for an unknown email or
    /// a failed verification, [`AuthError::WrongLoginType`] for federated
    /// identities, and [`AuthError::EmailNotVerified`] before
    /// confirmation. All three collapse to the same client-facing answer;
    /// the distinction only exists in logs and tests.
    pub async fn login_local(&self, email: &str, password: String) -> Result<Identity, AuthError> {
        let Some(identity) = self.identities.get_by_email(email).await? else {
            warn!("local login for unknown email");
            return Err(AuthError::WrongCredentials);
        };

        if !identity.login_type.is_local() {
            warn!(id = %identity.id, login_type = %identity.login_type, "local login against federated identity");
            return Err(AuthError::WrongLoginType);
        }

        if !identity.email_verified {
            warn!(id = %identity.id, "local login before email verification");
            return Err(AuthError::EmailNotVerified);
        }

        let digest = identity.password_digest.clone().ok_or_else(|| {
            error!(id = %identity.id, "local identity without a password digest");
            AuthError::Internal(anyhow::anyhow!("identity record is corrupt"))
        })?;

        if !self.passwords.verify(password, digest).await? {
            warn!(id = %identity.id, "local login with wrong password");
            return Err(AuthError::WrongCredentials);
        }

        debug!(id = %identity.id, "local login verified");
        Ok(identity)
    }

    /// Log in through a registered federated provider.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] if no strategy is registered
    /// for the provider, plus everything [`Self::reconcile_social`] can
    /// fail with.
    pub async fn login_social(
        &self,
        provider: LoginType,
        access_token: &str,
    ) -> Result<Identity, AuthError> {
        let strategy = self.providers.get(&provider).ok_or_else(|| {
            error!(provider = %provider, "no strategy registered for provider");
            AuthError::Internal(anyhow::anyhow!("provider not configured"))
        })?;
        let profile = strategy.fetch_profile(access_token).await?;
        self.reconcile_social(provider, &profile.username, &profile.email)
            .await
    }

    /// Reconcile a provider-asserted profile into an identity.
    ///
    /// An existing identity under the same provider is returned as-is
    /// (the provider vouches for the email). An existing identity under
    /// any other login type is a takeover attempt and conflicts. No
    /// identity at all means first federated login: one is created, with
    /// no password digest.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::InputValidation`] if `provider` is
    /// [`LoginType::Local`], [`AuthError::Conflict`] on a login-type
    /// mismatch, and [`AuthError::Internal`] on store failure.
    pub async fn reconcile_social(
        &self,
        provider: LoginType,
        username: &str,
        email: &str,
    ) -> Result<Identity, AuthError> {
        if provider.is_local() {
            return Err(AuthError::InputValidation(
                "a federated provider is required".to_owned(),
            ));
        }

        if let Some(existing) = self.identities.get_by_email(email).await? {
            if existing.login_type == provider {
                debug!(id = %existing.id, provider = %provider, "federated login reconciled");
                return Ok(existing);
            }
            warn!(
                id = %existing.id,
                held = %existing.login_type,
                attempted = %provider,
                "federated login against an identity of another type"
            );
            return Err(AuthError::Conflict);
        }

        let identity = Identity {
            id: Uuid::new_v4(),
            email: email.to_owned(),
            username: username.to_owned(),
            password_digest: None,
            login_type: provider,
            email_verified: false,
            created_at: Utc::now(),
        };
        let identity = self.create_with_profile(identity).await?;
        info!(id = %identity.id, provider = %provider, "created federated identity");
        Ok(identity)
    }

    /// Replace the identity's password digest.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::NotFound`] for an unknown id,
    /// [`AuthError::Forbidden`] for federated identities, and
    /// [`AuthError::Internal`] on store or hashing failure.
    pub async fn change_password(&self, id: Uuid, new_password: String) -> Result<(), AuthError> {
        let Some(mut identity) = self.identities.get(id).await? else {
            return Err(AuthError::NotFound);
        };

        if !identity.login_type.is_local() {
            warn!(id = %id, "password change on federated identity");
            return Err(AuthError::Forbidden);
        }

        identity.password_digest = Some(self.passwords.hash(new_password).await?);
        self.identities.update(&identity).await?;
        info!(id = %id, "password changed");
        Ok(())
    }

    /// Move the identity to a new email address.
    ///
    /// The new address starts unverified and must be confirmed again.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::NotFound`] for an unknown old email,
    /// [`AuthError::Forbidden`] for federated identities,
    /// [`AuthError::Conflict`] if the new email is taken, and
    /// [`AuthError::Internal`] on store failure.
    pub async fn change_email(
        &self,
        old_email: &str,
        new_email: &str,
    ) -> Result<Identity, AuthError> {
        let Some(mut identity) = self.identities.get_by_email(old_email).await? else {
            return Err(AuthError::NotFound);
        };

        if !identity.login_type.is_local() {
            warn!(id = %identity.id, "email change on federated identity");
            return Err(AuthError::Forbidden);
        }

        identity.email = new_email.to_owned();
        identity.email_verified = false;
        self.identities.update(&identity).await?;
        info!(id = %identity.id, "email changed, pending re-verification");
        Ok(identity)
    }

    /// Mark the identity's email as verified. Idempotent.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::NotFound`] for an unknown id and
    /// [`AuthError::Internal`] on store failure.
    pub async fn verify_email(&self, id: Uuid) -> Result<(), AuthError> {
        let Some(mut identity) = self.identities.get(id).await? else {
            return Err(AuthError::NotFound);
        };

        if identity.email_verified {
            return Ok(());
        }

        identity.email_verified = true;
        self.identities.update(&identity).await?;
        info!(id = %id, "email verified");
        Ok(())
    }

    /// Fetch an identity by email.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::NotFound`] if absent and
    /// [`AuthError::Internal`] on store failure.
    pub async fn get_by_email(&self, email: &str) -> Result<Identity, AuthError> {
        self.identities
            .get_by_email(email)
            .await?
            .ok_or(AuthError::NotFound)
    }

    /// Remove the identity and its linked profile.
    ///
    /// The identity row is authoritative: once it is gone the account is
    /// deleted, and a failing profile removal is queued for the sweeper
    /// rather than failing the call.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] if the identity removal itself
    /// fails.
    pub async fn delete_identity(&self, id: Uuid) -> Result<(), AuthError> {
        self.identities.remove(id).await?;

        if let Err(e) = self.profiles.remove(id).await {
            warn!(id = %id, error = %e, "profile removal failed, queued for sweeper");
            self.orphans.profiles.insert(id);
        }

        info!(id = %id, "identity deleted");
        Ok(())
    }

    /// Retry every queued cleanup. Idempotent; safe to run on a timer.
    ///
    /// Returns how many orphans were cleaned up this pass.
    pub async fn sweep_orphans(&self) -> usize {
        let mut cleaned = 0;

        for id in self.orphans.profiles.iter().map(|r| *r.key()).collect::<Vec<_>>() {
            match self.profiles.remove(id).await {
                Ok(()) => {
                    self.orphans.profiles.remove(&id);
                    cleaned += 1;
                }
                Err(e) => warn!(id = %id, error = %e, "orphaned profile still not removable"),
            }
        }

        for id in self.orphans.identities.iter().map(|r| *r.key()).collect::<Vec<_>>() {
            match self.identities.remove(id).await {
                Ok(()) => {
                    self.orphans.identities.remove(&id);
                    cleaned += 1;
                }
                Err(e) => warn!(id = %id, error = %e, "orphaned identity still not removable"),
            }
        }

        if cleaned > 0 {
            info!(cleaned, "orphan sweep finished");
        }
        cleaned
    }

    /// Whether any partial failure is still waiting for the sweeper.
    #[must_use]
    pub fn has_pending_orphans(&self) -> bool {
        !self.orphans.profiles.is_empty() || !self.orphans.identities.is_empty()
    }

    /// Insert identity + profile as one logical creation.
    ///
    /// The writes hit two independent stores. If the profile write fails
    /// the identity insert is compensated with a delete before the error
    /// returns; if even the compensation fails, the identity id is queued
    /// for the sweeper so the half-created account cannot linger silently.
    async fn create_with_profile(&self, identity: Identity) -> Result<Identity, AuthError> {
        match self.identities.insert(&identity).await {
            Ok(()) => {}
            Err(StoreError::Duplicate) => {
                warn!("registration with an email that already exists");
                return Err(AuthError::Conflict);
            }
            Err(e) => return Err(e.into()),
        }

        let profile = Profile {
            id: identity.id,
            username: identity.username.clone(),
        };
        if let Err(profile_err) = self.profiles.insert(&profile).await {
            error!(id = %identity.id, error = %profile_err, "profile creation failed, rolling back identity");
            if let Err(rollback_err) = self.identities.remove(identity.id).await {
                error!(id = %identity.id, error = %rollback_err, "rollback failed, queued for sweeper");
                self.orphans.identities.insert(identity.id);
            }
            return Err(AuthError::Internal(anyhow::anyhow!(
                "profile creation failed: {profile_err}"
            )));
        }

        debug!(id = %identity.id, "identity and profile created");
        Ok(identity)
    }
}

/// Run the orphan sweeper on an interval until the handle is dropped.
pub fn spawn_sweeper(service: Arc<IdentityService>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            service.sweep_orphans().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PasswordConfig;
    use crate::store::memory::{MemoryIdentityStore, MemoryProfileStore};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Profile store that fails on demand.
    #[derive(Default)]
    struct FlakyProfileStore {
        inner: MemoryProfileStore,
        failing: AtomicBool,
    }

    impl FlakyProfileStore {
        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProfileStore for FlakyProfileStore {
        async fn insert(&self, profile: &Profile) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Backend(anyhow::anyhow!("profile store down")));
            }
            self.inner.insert(profile).await
        }

        async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Backend(anyhow::anyhow!("profile store down")));
            }
            self.inner.remove(id).await
        }
    }

    struct Fixture {
        service: IdentityService,
        identities: Arc<MemoryIdentityStore>,
        profiles: Arc<FlakyProfileStore>,
    }

    fn fixture() -> Fixture {
        let identities = Arc::new(MemoryIdentityStore::new());
        let profiles = Arc::new(FlakyProfileStore::default());
        let passwords =
            PasswordService::new(&PasswordConfig::insecure_fast()).expect("test parameters");
        let service = IdentityService::new(
            identities.clone(),
            profiles.clone(),
            passwords,
            Vec::new(),
        );
        Fixture {
            service,
            identities,
            profiles,
        }
    }

    const PASSWORD: &str = "Str0ng!Pass1";

    #[tokio::test]
    async fn register_creates_an_unverified_local_identity() {
        let f = fixture();
        let identity = f
            .service
            .register("alice", "a@x.com", PASSWORD.into())
            .await
            .unwrap();

        assert_eq!(identity.login_type, LoginType::Local);
        assert!(!identity.email_verified);
        assert!(identity.password_digest.as_deref().unwrap().starts_with("$argon2i$"));
        assert_eq!(f.profiles.inner.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let f = fixture();
        f.service
            .register("alice", "a@x.com", PASSWORD.into())
            .await
            .unwrap();
        let err = f
            .service
            .register("bob", "a@x.com", "An0ther!Pass9".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict));
    }

    #[tokio::test]
    async fn unverified_identity_cannot_login_even_with_correct_password() {
        let f = fixture();
        f.service
            .register("alice", "a@x.com", PASSWORD.into())
            .await
            .unwrap();
        let err = f
            .service
            .login_local("a@x.com", PASSWORD.into())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailNotVerified));
    }

    #[tokio::test]
    async fn login_failures_collapse_for_clients() {
        let f = fixture();
        let identity = f
            .service
            .register("alice", "a@x.com", PASSWORD.into())
            .await
            .unwrap();
        f.service.verify_email(identity.id).await.unwrap();

        let wrong_password = f
            .service
            .login_local("a@x.com", "Wr0ng!Password".into())
            .await
            .unwrap_err();
        let unknown_email = f
            .service
            .login_local("nobody@x.com", PASSWORD.into())
            .await
            .unwrap_err();

        assert_eq!(wrong_password.kind(), unknown_email.kind());
        assert_eq!(wrong_password.client_message(), unknown_email.client_message());
    }

    #[tokio::test]
    async fn verified_login_round_trips() {
        let f = fixture();
        let identity = f
            .service
            .register("alice", "a@x.com", PASSWORD.into())
            .await
            .unwrap();
        f.service.verify_email(identity.id).await.unwrap();

        let logged_in = f
            .service
            .login_local("a@x.com", PASSWORD.into())
            .await
            .unwrap();
        assert_eq!(logged_in.id, identity.id);
    }

    #[tokio::test]
    async fn social_reconciliation_creates_then_returns() {
        let f = fixture();
        let created = f
            .service
            .reconcile_social(LoginType::Google, "alice", "a@gmail.test")
            .await
            .unwrap();
        assert_eq!(created.login_type, LoginType::Google);
        assert!(created.password_digest.is_none());

        let returned = f
            .service
            .reconcile_social(LoginType::Google, "alice", "a@gmail.test")
            .await
            .unwrap();
        assert_eq!(returned.id, created.id);
    }

    #[tokio::test]
    async fn cross_provider_email_is_a_conflict() {
        let f = fixture();
        f.service
            .reconcile_social(LoginType::Google, "alice", "a@x.com")
            .await
            .unwrap();

        let err = f
            .service
            .reconcile_social(LoginType::Facebook, "alice", "a@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict));

        let err = f
            .service
            .register("alice", "a@x.com", PASSWORD.into())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict));
    }

    #[tokio::test]
    async fn local_reconciliation_is_rejected() {
        let f = fixture();
        let err = f
            .service
            .reconcile_social(LoginType::Local, "alice", "a@x.com")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InputValidation(_)));
    }

    #[tokio::test]
    async fn federated_identities_cannot_change_password_or_email() {
        let f = fixture();
        let identity = f
            .service
            .reconcile_social(LoginType::Facebook, "alice", "a@fb.test")
            .await
            .unwrap();

        let err = f
            .service
            .change_password(identity.id, "N3w!Password0".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden));

        let err = f
            .service
            .change_email("a@fb.test", "b@fb.test")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden));
    }

    #[tokio::test]
    async fn email_change_resets_verification() {
        let f = fixture();
        let identity = f
            .service
            .register("alice", "a@x.com", PASSWORD.into())
            .await
            .unwrap();
        f.service.verify_email(identity.id).await.unwrap();

        let updated = f.service.change_email("a@x.com", "b@x.com").await.unwrap();
        assert_eq!(updated.email, "b@x.com");
        assert!(!updated.email_verified);

        let stored = f.identities.get(identity.id).await.unwrap().unwrap();
        assert!(!stored.email_verified);
    }

    #[tokio::test]
    async fn password_change_replaces_the_digest() {
        let f = fixture();
        let identity = f
            .service
            .register("alice", "a@x.com", PASSWORD.into())
            .await
            .unwrap();
        let before = identity.password_digest.clone().unwrap();

        f.service
            .change_password(identity.id, "N3w!Password0".into())
            .await
            .unwrap();
        let after = f
            .identities
            .get(identity.id)
            .await
            .unwrap()
            .unwrap()
            .password_digest
            .unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn verify_email_is_idempotent() {
        let f = fixture();
        let identity = f
            .service
            .register("alice", "a@x.com", PASSWORD.into())
            .await
            .unwrap();
        f.service.verify_email(identity.id).await.unwrap();
        f.service.verify_email(identity.id).await.unwrap();
        assert!(f.identities.get(identity.id).await.unwrap().unwrap().email_verified);
    }

    #[tokio::test]
    async fn failed_profile_write_rolls_back_the_identity() {
        let f = fixture();
        f.profiles.set_failing(true);

        let err = f
            .service
            .register("alice", "a@x.com", PASSWORD.into())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        assert!(f.identities.get_by_email("a@x.com").await.unwrap().is_none());

        // The rollback freed the email for a later attempt.
        f.profiles.set_failing(false);
        f.service
            .register("alice", "a@x.com", PASSWORD.into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_profile_delete_is_swept_later() {
        let f = fixture();
        let identity = f
            .service
            .register("alice", "a@x.com", PASSWORD.into())
            .await
            .unwrap();

        f.profiles.set_failing(true);
        f.service.delete_identity(identity.id).await.unwrap();
        assert!(f.service.has_pending_orphans());
        assert_eq!(f.profiles.inner.len(), 1);

        // Sweeping while the store is still down changes nothing.
        assert_eq!(f.service.sweep_orphans().await, 0);

        f.profiles.set_failing(false);
        assert_eq!(f.service.sweep_orphans().await, 1);
        assert!(!f.service.has_pending_orphans());
        assert!(f.profiles.inner.is_empty());
    }

    #[tokio::test]
    async fn unknown_provider_strategy_is_an_internal_error() {
        let f = fixture();
        let err = f
            .service
            .login_social(LoginType::Google, "some-token")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
    }

    #[tokio::test]
    async fn provider_strategy_table_drives_social_login() {
        struct StubProvider;

        #[async_trait]
        impl SocialProvider for StubProvider {
            fn login_type(&self) -> LoginType {
                LoginType::Google
            }

            async fn fetch_profile(&self, access_token: &str) -> Result<SocialProfile, AuthError> {
                assert_eq!(access_token, "valid-token");
                Ok(SocialProfile {
                    username: "alice".to_owned(),
                    email: "a@gmail.test".to_owned(),
                })
            }
        }

        let identities = Arc::new(MemoryIdentityStore::new());
        let profiles = Arc::new(MemoryProfileStore::new());
        let passwords =
            PasswordService::new(&PasswordConfig::insecure_fast()).expect("test parameters");
        let service = IdentityService::new(
            identities,
            profiles,
            passwords,
            vec![Arc::new(StubProvider)],
        );

        let identity = service
            .login_social(LoginType::Google, "valid-token")
            .await
            .unwrap();
        assert_eq!(identity.login_type, LoginType::Google);
        assert_eq!(identity.email, "a@gmail.test");
    }
}
