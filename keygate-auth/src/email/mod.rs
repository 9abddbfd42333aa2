//! Outbound notification seam.
//!
//! The flows hand a [`TokenMail`] to a [`Notifier`] and move on;
//! delivery is best-effort and carries no authentication state. The SMTP
//! implementation lives in [`smtp`]; [`RecordingNotifier`] captures mail
//! for tests and local tooling.

pub mod smtp;

use async_trait::async_trait;
use uuid::Uuid;

/// Which link a notification carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    /// Email-verification link.
    Verification,
    /// Password-reset link.
    PasswordReset,
}

/// A notification about a one-time token link.
#[derive(Debug, Clone)]
pub struct TokenMail {
    /// Recipient address.
    pub to: String,
    /// Recipient display name, rendered into the link and the body.
    pub username: String,
    /// Subject identity the token was issued for.
    pub subject: Uuid,
    /// The one-time token, in hex.
    pub token: String,
}

/// Delivery failure. The flows log it and surface a generic error; it
/// never carries token material back to a client.
#[derive(Debug, thiserror::Error)]
#[error("notification could not be sent")]
pub struct NotifyError(#[source] pub anyhow::Error);

/// Something that can deliver token links to an address.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an email-verification link.
    async fn send_verification(&self, mail: &TokenMail) -> Result<(), NotifyError>;

    /// Deliver a password-reset link.
    async fn send_password_reset(&self, mail: &TokenMail) -> Result<(), NotifyError>;
}

/// Notifier that records instead of sending. For tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: parking_lot::Mutex<Vec<(MailKind, TokenMail)>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<(MailKind, TokenMail)> {
        self.sent.lock().clone()
    }

    /// The most recent recorded mail, if any.
    #[must_use]
    pub fn last(&self) -> Option<(MailKind, TokenMail)> {
        self.sent.lock().last().cloned()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_verification(&self, mail: &TokenMail) -> Result<(), NotifyError> {
        self.sent.lock().push((MailKind::Verification, mail.clone()));
        Ok(())
    }

    async fn send_password_reset(&self, mail: &TokenMail) -> Result<(), NotifyError> {
        self.sent.lock().push((MailKind::PasswordReset, mail.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorder_keeps_order_and_kind() {
        let recorder = RecordingNotifier::new();
        let mail = TokenMail {
            to: "a@x.com".to_owned(),
            username: "alice".to_owned(),
            subject: Uuid::new_v4(),
            token: "ab".repeat(20),
        };

        recorder.send_verification(&mail).await.unwrap();
        recorder.send_password_reset(&mail).await.unwrap();

        let sent = recorder.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, MailKind::Verification);
        assert_eq!(sent[1].0, MailKind::PasswordReset);
        assert_eq!(recorder.last().unwrap().0, MailKind::PasswordReset);
    }
}
