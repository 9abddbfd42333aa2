//! SMTP notifier built on lettre.

use anyhow::anyhow;
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{error, info};

use super::{MailKind, Notifier, NotifyError, TokenMail};
use crate::config::MailConfig;

/// Notifier delivering through an SMTP relay.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    app_name: String,
    base_url: String,
}

impl SmtpNotifier {
    /// Build a notifier from mail configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay address or the sender mailbox is
    /// invalid.
    pub fn new(config: &MailConfig) -> anyhow::Result<Self> {
        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        builder = builder.port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| anyhow!("invalid sender address: {e}"))?;

        info!(host = %config.host, port = config.port, starttls = config.starttls, "created SMTP transport");

        Ok(Self {
            transport: builder.build(),
            from,
            app_name: config.app_name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn link(&self, kind: MailKind, mail: &TokenMail) -> String {
        let path = match kind {
            MailKind::Verification => "verifyEmail",
            MailKind::PasswordReset => "resetPassword",
        };
        format!(
            "{}/{path}/{}/{}/{}",
            self.base_url, mail.username, mail.subject, mail.token
        )
    }

    async fn deliver(&self, kind: MailKind, mail: &TokenMail) -> Result<(), NotifyError> {
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|e| NotifyError(anyhow!("invalid recipient address: {e}")))?;

        let (subject, intro) = match kind {
            MailKind::Verification => (
                format!("Confirm your {} email address", self.app_name),
                "please confirm your email address",
            ),
            MailKind::PasswordReset => (
                format!("Reset your {} password", self.app_name),
                "a password reset was requested for your account",
            ),
        };

        let body = format!(
            "Hello {username},\n\n{intro}:\n\n{link}\n\nThe link is valid for a limited time and works once.\n",
            username = mail.username,
            link = self.link(kind, mail),
        );

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| NotifyError(anyhow!("message assembly failed: {e}")))?;

        self.transport.send(message).await.map_err(|e| {
            error!(kind = ?kind, "mail delivery failed");
            NotifyError(anyhow!("smtp delivery failed: {e}"))
        })?;

        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_verification(&self, mail: &TokenMail) -> Result<(), NotifyError> {
        self.deliver(MailKind::Verification, mail).await
    }

    async fn send_password_reset(&self, mail: &TokenMail) -> Result<(), NotifyError> {
        self.deliver(MailKind::PasswordReset, mail).await
    }
}
