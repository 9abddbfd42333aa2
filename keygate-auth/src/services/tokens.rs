//! Single-use, TTL-bound tokens for email verification and password reset.
//!
//! Tokens live in the expiring keyed store under `<prefix>:<subject-id>`,
//! so a subject has at most one live token per purpose; issuing again
//! overwrites the pending one. Redemption is the store's atomic take
//! followed by a constant-time comparison: of two concurrent redemptions
//! at most one can observe the stored value, which is what makes the
//! tokens single-use.
//!
//! The store also carries the reset-pending ticket that bridges the gap
//! between redeeming a reset link and submitting the new password. The
//! ticket is keyed by session id and holds the subject id, so the session
//! record itself never learns about in-flight resets.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use rand::Rng;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::error::AuthError;
use crate::store::ExpiringStore;

/// What a one-time token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    /// Confirming ownership of an email address.
    VerifyEmail,
    /// Opening a password-reset window.
    ResetPassword,
}

impl TokenPurpose {
    /// Key prefix in the expiring store.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::VerifyEmail => "veem",
            Self::ResetPassword => "repw",
        }
    }
}

/// Key prefix for reset-pending tickets.
const RESET_PENDING_PREFIX: &str = "repd";

/// Issues and redeems one-time tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    store: Arc<dyn ExpiringStore>,
    config: TokenConfig,
}

impl TokenIssuer {
    /// Create an issuer over the given expiring store.
    #[must_use]
    pub fn new(store: Arc<dyn ExpiringStore>, config: TokenConfig) -> Self {
        Self { store, config }
    }

    const fn ttl(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::VerifyEmail => Duration::from_secs(self.config.verify_ttl_seconds),
            TokenPurpose::ResetPassword => Duration::from_secs(self.config.reset_ttl_seconds),
        }
    }

    fn random_token(&self) -> String {
        let mut bytes = vec![0u8; self.config.token_bytes];
        rand::rng().fill(&mut bytes[..]);
        hex::encode(bytes)
    }

    /// Issue a token for `subject`, replacing any pending one for the same
    /// purpose.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] if the store write fails.
    pub async fn issue(&self, purpose: TokenPurpose, subject: Uuid) -> Result<String, AuthError> {
        let token = self.random_token();
        let key = format!("{}:{subject}", purpose.prefix());
        self.store.put(&key, &token, self.ttl(purpose)).await?;
        debug!(purpose = ?purpose, subject = %subject, "issued one-time token");
        Ok(token)
    }

    /// Redeem a token. Succeeds at most once per issued token.
    ///
    /// The stored value is taken before it is compared, so a concurrent
    /// redemption race has exactly one winner; the comparison itself is
    /// constant-time over the token bytes.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::LinkExpired`] whether the token was never
    /// issued, expired, already consumed, or simply wrong; callers cannot
    /// tell which. Store failures surface as [`AuthError::Internal`].
    pub async fn redeem(
        &self,
        purpose: TokenPurpose,
        subject: Uuid,
        candidate: &str,
    ) -> Result<(), AuthError> {
        let key = format!("{}:{subject}", purpose.prefix());
        let Some(stored) = self.store.take(&key).await? else {
            warn!(purpose = ?purpose, subject = %subject, "redemption of absent token");
            return Err(AuthError::LinkExpired);
        };

        if constant_time_eq(stored.as_bytes(), candidate.as_bytes()) {
            debug!(purpose = ?purpose, subject = %subject, "token redeemed");
            Ok(())
        } else {
            warn!(purpose = ?purpose, subject = %subject, "redemption with mismatched token");
            Err(AuthError::LinkExpired)
        }
    }

    /// Open the reset window for a session after its reset link was
    /// redeemed. The ticket records which subject the reset belongs to.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Internal`] if the store write fails.
    pub async fn open_reset_window(&self, session_id: &str, subject: Uuid) -> Result<(), AuthError> {
        let key = format!("{RESET_PENDING_PREFIX}:{session_id}");
        self.store
            .put(
                &key,
                &subject.to_string(),
                Duration::from_secs(self.config.reset_window_seconds),
            )
            .await?;
        debug!(subject = %subject, "opened reset window");
        Ok(())
    }

    /// Claim and close the session's reset window, returning the subject
    /// the reset was opened for.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::LinkExpired`] if no window is open for the
    /// session, and [`AuthError::Internal`] on store failure or a corrupt
    /// ticket value.
    pub async fn claim_reset_window(&self, session_id: &str) -> Result<Uuid, AuthError> {
        let key = format!("{RESET_PENDING_PREFIX}:{session_id}");
        let Some(value) = self.store.take(&key).await? else {
            return Err(AuthError::LinkExpired);
        };
        value
            .parse()
            .map_err(|_| AuthError::Internal(anyhow!("corrupt reset ticket")))
    }
}

/// Length-guarded constant-time equality.
///
/// The length check is not secret: token lengths are public protocol
/// shape. Content comparison never short-circuits.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryExpiringStore;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(Arc::new(MemoryExpiringStore::new()), TokenConfig::default())
    }

    #[tokio::test]
    async fn tokens_are_forty_hex_chars() {
        let issuer = issuer();
        let token = issuer
            .issue(TokenPurpose::VerifyEmail, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(token.len(), 40);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn redemption_succeeds_exactly_once() {
        let issuer = issuer();
        let subject = Uuid::new_v4();
        let token = issuer.issue(TokenPurpose::VerifyEmail, subject).await.unwrap();

        issuer
            .redeem(TokenPurpose::VerifyEmail, subject, &token)
            .await
            .unwrap();
        let err = issuer
            .redeem(TokenPurpose::VerifyEmail, subject, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LinkExpired));
    }

    #[tokio::test]
    async fn wrong_candidate_fails_and_consumes_nothing_visible() {
        let issuer = issuer();
        let subject = Uuid::new_v4();
        let token = issuer.issue(TokenPurpose::ResetPassword, subject).await.unwrap();

        let mut wrong = token.clone();
        let flipped = if wrong.ends_with('0') { '1' } else { '0' };
        wrong.pop();
        wrong.push(flipped);

        let err = issuer
            .redeem(TokenPurpose::ResetPassword, subject, &wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LinkExpired));
    }

    #[tokio::test]
    async fn reissue_invalidates_the_previous_token() {
        let issuer = issuer();
        let subject = Uuid::new_v4();
        let first = issuer.issue(TokenPurpose::VerifyEmail, subject).await.unwrap();
        let second = issuer.issue(TokenPurpose::VerifyEmail, subject).await.unwrap();
        assert_ne!(first, second);

        let err = issuer
            .redeem(TokenPurpose::VerifyEmail, subject, &first)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LinkExpired));
    }

    #[tokio::test]
    async fn purposes_do_not_cross_redeem() {
        let issuer = issuer();
        let subject = Uuid::new_v4();
        let token = issuer.issue(TokenPurpose::VerifyEmail, subject).await.unwrap();

        let err = issuer
            .redeem(TokenPurpose::ResetPassword, subject, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LinkExpired));
    }

    #[tokio::test]
    async fn concurrent_redemptions_have_one_winner() {
        let issuer = issuer();
        let subject = Uuid::new_v4();
        let token = issuer.issue(TokenPurpose::VerifyEmail, subject).await.unwrap();

        let (first, second) = tokio::join!(
            issuer.redeem(TokenPurpose::VerifyEmail, subject, &token),
            issuer.redeem(TokenPurpose::VerifyEmail, subject, &token),
        );
        assert_eq!(
            u32::from(first.is_ok()) + u32::from(second.is_ok()),
            1,
            "exactly one concurrent redemption may succeed"
        );
    }

    #[tokio::test]
    async fn reset_window_claims_once() {
        let issuer = issuer();
        let subject = Uuid::new_v4();
        issuer.open_reset_window("session-1", subject).await.unwrap();

        assert_eq!(issuer.claim_reset_window("session-1").await.unwrap(), subject);
        let err = issuer.claim_reset_window("session-1").await.unwrap_err();
        assert!(matches!(err, AuthError::LinkExpired));
    }

    #[test]
    fn constant_time_eq_handles_lengths() {
        assert!(constant_time_eq(b"abcd", b"abcd"));
        assert!(!constant_time_eq(b"abcd", b"abce"));
        assert!(!constant_time_eq(b"abcd", b"abc"));
    }
}
