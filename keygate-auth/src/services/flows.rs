//! Operation-level entry points for a routing layer.
//!
//! Each flow composes the underlying services the way the public
//! endpoints need them: validation first, then identity work, then token
//! issuance, mail, and session bookkeeping. The flows own no state of
//! their own and hold every collaborator behind the seams the services
//! define, so a host can swap stores, providers, and the mailer freely.

use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::email::{Notifier, TokenMail};
use crate::error::AuthError;
use crate::input::{self, LoginInput, RegisterInput};
use crate::services::identity::IdentityService;
use crate::services::session::SessionManager;
use crate::services::tokens::{TokenIssuer, TokenPurpose};
use crate::{Identity, LoginType, Principal, Session};

/// The assembled authentication flows.
#[derive(Clone)]
pub struct AuthFlows {
    identity: Arc<IdentityService>,
    tokens: TokenIssuer,
    sessions: SessionManager,
    notifier: Arc<dyn Notifier>,
}

impl AuthFlows {
    /// Assemble the flows from their collaborators.
    #[must_use]
    pub fn new(
        identity: Arc<IdentityService>,
        tokens: TokenIssuer,
        sessions: SessionManager,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            identity,
            tokens,
            sessions,
            notifier,
        }
    }

    /// The identity service, for hosts that need direct access.
    #[must_use]
    pub fn identity(&self) -> &Arc<IdentityService> {
        &self.identity
    }

    /// The session manager, for cookie handling in the routing layer.
    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Register a local account and mail the verification link.
    ///
    /// # Errors
    ///
    /// Input, conflict, and store failures as in
    /// [`IdentityService::register`]; a mail failure surfaces as
    /// [`AuthError::Internal`] after the account exists.
    pub async fn register(&self, input: RegisterInput) -> Result<Identity, AuthError> {
        let input = input.validated()?;
        let identity = self
            .identity
            .register(&input.username, &input.email, input.password)
            .await?;
        self.send_link(TokenPurpose::VerifyEmail, &identity).await?;
        info!(id = %identity.id, "registration complete, verification mail sent");
        Ok(identity)
    }

    /// Re-send the verification link for an existing account.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::NotFound`] for an unknown email, plus
    /// token and mail failures.
    pub async fn request_email_verification(&self, email: &str) -> Result<(), AuthError> {
        input::ensure_email(email)?;
        let identity = self.identity.get_by_email(email).await?;
        self.send_link(TokenPurpose::VerifyEmail, &identity).await
    }

    /// Redeem a verification link and mark the email verified.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::LinkExpired`] for a consumed, expired, or
    /// mismatched token; [`AuthError::NotFound`] if the identity vanished
    /// in between.
    pub async fn confirm_email(&self, id: Uuid, token: &str) -> Result<(), AuthError> {
        input::ensure_token_shape(token)?;
        self.tokens.redeem(TokenPurpose::VerifyEmail, id, token).await?;
        self.identity.verify_email(id).await
    }

    /// Local login: verify credentials, then swap the session id.
    ///
    /// Returns the identity together with the regenerated session the
    /// routing layer must set as the new cookie.
    ///
    /// # Errors
    ///
    /// Credential failures as in [`IdentityService::login_local`]; if the
    /// session store cannot persist the regenerated session the login
    /// fails as [`AuthError::Internal`] and no principal is attached
    /// anywhere.
    pub async fn login_local(
        &self,
        current_session: Option<&str>,
        input: LoginInput,
    ) -> Result<(Identity, Session), AuthError> {
        let input = input.validated()?;
        let identity = self.identity.login_local(&input.email, input.password).await?;
        let session = self
            .sessions
            .login(
                current_session,
                Principal {
                    id: identity.id,
                    email: identity.email.clone(),
                },
            )
            .await?;
        info!(id = %identity.id, "local login");
        Ok((identity, session))
    }

    /// Federated login via a registered provider strategy.
    ///
    /// # Errors
    ///
    /// As [`IdentityService::login_social`], plus session failures as in
    /// [`Self::login_local`].
    pub async fn login_social(
        &self,
        current_session: Option<&str>,
        provider: LoginType,
        access_token: &str,
    ) -> Result<(Identity, Session), AuthError> {
        let identity = self.identity.login_social(provider, access_token).await?;
        let session = self
            .sessions
            .login(
                current_session,
                Principal {
                    id: identity.id,
                    email: identity.email.clone(),
                },
            )
            .await?;
        info!(id = %identity.id, provider = %provider, "federated login");
        Ok((identity, session))
    }

    /// Destroy the caller's session entirely.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] on store failure.
    pub async fn logout(&self, session_id: &str) -> Result<(), AuthError> {
        self.sessions.destroy(session_id).await
    }

    /// Change the authenticated user's password, then end the session.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Unauthorized`] without a principal;
    /// otherwise as [`IdentityService::change_password`].
    pub async fn change_password(
        &self,
        session: &Session,
        new_password: String,
    ) -> Result<(), AuthError> {
        let principal = Self::require_principal(session)?;
        input::ensure_password(&new_password)?;
        self.identity.change_password(principal.id, new_password).await?;
        self.sessions.destroy(&session.session_id).await
    }

    /// Change the authenticated user's email, mail a fresh verification
    /// link to the new address, and end the session.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Unauthorized`] without a principal;
    /// otherwise as [`IdentityService::change_email`] plus token and mail
    /// failures.
    pub async fn change_email(&self, session: &Session, new_email: &str) -> Result<(), AuthError> {
        let principal = Self::require_principal(session)?;
        input::ensure_email(new_email)?;
        let updated = self.identity.change_email(&principal.email, new_email).await?;
        self.send_link(TokenPurpose::VerifyEmail, &updated).await?;
        self.sessions.destroy(&session.session_id).await
    }

    /// Mail a password-reset link.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::NotFound`] for an unknown email, plus
    /// token and mail failures.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        input::ensure_email(email)?;
        let identity = self.identity.get_by_email(email).await?;
        self.send_link(TokenPurpose::ResetPassword, &identity).await
    }

    /// Redeem a reset link and open the reset window for this session.
    ///
    /// The link token is consumed here, once; what remains is a
    /// short-lived ticket bound to the caller's session that only
    /// [`Self::submit_password_reset`] can claim.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::LinkExpired`] for a consumed, expired, or
    /// mismatched token.
    pub async fn open_password_reset(
        &self,
        session_id: &str,
        id: Uuid,
        token: &str,
    ) -> Result<(), AuthError> {
        input::ensure_token_shape(token)?;
        self.tokens.redeem(TokenPurpose::ResetPassword, id, token).await?;
        self.tokens.open_reset_window(session_id, id).await
    }

    /// Set the new password inside an open reset window, then end the
    /// session.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::LinkExpired`] if no window is open for the
    /// session, [`AuthError::InputValidation`] if the confirmation does
    /// not match or the password is weak; otherwise as
    /// [`IdentityService::change_password`].
    pub async fn submit_password_reset(
        &self,
        session_id: &str,
        new_password: String,
        confirm_password: &str,
    ) -> Result<(), AuthError> {
        input::ensure_password(&new_password)?;
        if new_password != confirm_password {
            return Err(AuthError::InputValidation(
                "passwords do not match".to_owned(),
            ));
        }

        let subject = self.tokens.claim_reset_window(session_id).await?;
        self.identity.change_password(subject, new_password).await?;
        self.sessions.destroy(session_id).await
    }

    /// Delete the authenticated user's account and end the session.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Unauthorized`] without a principal;
    /// otherwise as [`IdentityService::delete_identity`].
    pub async fn delete_account(&self, session: &Session) -> Result<(), AuthError> {
        let principal = Self::require_principal(session)?;
        self.identity.delete_identity(principal.id).await?;
        self.sessions.destroy(&session.session_id).await
    }

    fn require_principal(session: &Session) -> Result<&Principal, AuthError> {
        session.principal.as_ref().ok_or(AuthError::Unauthorized)
    }

    async fn send_link(&self, purpose: TokenPurpose, identity: &Identity) -> Result<(), AuthError> {
        let token = self.tokens.issue(purpose, identity.id).await?;
        let mail = TokenMail {
            to: identity.email.clone(),
            username: identity.username.clone(),
            subject: identity.id,
            token,
        };
        let delivery = match purpose {
            TokenPurpose::VerifyEmail => self.notifier.send_verification(&mail).await,
            TokenPurpose::ResetPassword => self.notifier.send_password_reset(&mail).await,
        };
        delivery.map_err(|e| {
            error!(id = %identity.id, purpose = ?purpose, "token mail could not be delivered");
            AuthError::Internal(anyhow::anyhow!(e))
        })
    }
}
