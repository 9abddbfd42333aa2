//! Error taxonomy for the authentication core.
//!
//! Variants stay precise internally so logs and tests can tell failures
//! apart; [`AuthError::kind`] and [`AuthError::client_message`] give the
//! collapsed, enumeration-safe view a routing layer is allowed to show.

use crate::store::StoreError;

/// Everything an authentication operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No identity for the given id or email.
    #[error("identity not found")]
    NotFound,

    /// Email already registered, or a federated identity exists under a
    /// different provider.
    #[error("conflicting identity already exists")]
    Conflict,

    /// Password verification failed, or the email is unknown to the login
    /// path. Collapsed externally with the other login rejections.
    #[error("wrong credentials")]
    WrongCredentials,

    /// Local login attempted against a federated identity.
    #[error("wrong login type for this identity")]
    WrongLoginType,

    /// Local login attempted before the email was confirmed.
    #[error("email not verified")]
    EmailNotVerified,

    /// Operation disallowed for the identity's login type.
    #[error("operation not allowed for this login type")]
    Forbidden,

    /// Token absent, expired, already consumed, or mismatched. One
    /// undifferentiated outcome on purpose.
    #[error("link expired")]
    LinkExpired,

    /// Missing/invalid session, or a CSRF/origin check failed.
    #[error("unauthorized")]
    Unauthorized,

    /// Malformed request data, rejected before any store access.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// Store, crypto, or runtime failure. Full detail stays in logs;
    /// callers only ever see a constant message.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Client-facing classification of an [`AuthError`].
///
/// The three local-login rejections collapse to [`ErrorKind::BadRequest`]
/// so responses cannot be used to enumerate accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected request the caller can correct (or must not learn more
    /// about).
    BadRequest,
    /// A conflicting record already exists.
    Conflict,
    /// The operation is not available to this identity.
    Forbidden,
    /// Nothing at this address, including expired one-time links.
    NotFound,
    /// Authentication or same-origin proof missing.
    Unauthorized,
    /// Input failed validation.
    UnprocessableInput,
    /// Server-side failure with no client-visible detail.
    Internal,
}

impl AuthError {
    /// Classification a routing layer can map onto a status code.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Conflict => ErrorKind::Conflict,
            Self::WrongCredentials | Self::WrongLoginType | Self::EmailNotVerified => {
                ErrorKind::BadRequest
            }
            Self::Forbidden => ErrorKind::Forbidden,
            Self::LinkExpired => ErrorKind::NotFound,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::InputValidation(_) => ErrorKind::UnprocessableInput,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Safe user-facing message. Never carries implementation detail.
    #[must_use]
    pub const fn client_message(&self) -> &'static str {
        match self {
            Self::NotFound => "Email could not be found.",
            Self::Conflict => "Email already exists.",
            Self::WrongCredentials | Self::WrongLoginType | Self::EmailNotVerified => {
                "Wrong email or password."
            }
            Self::Forbidden => {
                "You cannot change this if you registered with Google or Facebook."
            }
            Self::LinkExpired => "This link expired.",
            Self::Unauthorized => "Please login first.",
            Self::InputValidation(_) => "Please check your input again.",
            Self::Internal(_) => "Something went wrong!",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => Self::Conflict,
            StoreError::Backend(source) => Self::Internal(source),
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::InputValidation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_rejections_collapse_externally() {
        let wrong_password = AuthError::WrongCredentials;
        let unknown_type = AuthError::WrongLoginType;
        let unverified = AuthError::EmailNotVerified;

        assert_eq!(wrong_password.kind(), unknown_type.kind());
        assert_eq!(wrong_password.kind(), unverified.kind());
        assert_eq!(wrong_password.client_message(), unknown_type.client_message());
        assert_eq!(wrong_password.client_message(), unverified.client_message());
    }

    #[test]
    fn internal_errors_hide_detail_from_clients() {
        let err = AuthError::from(anyhow::anyhow!("connection refused to 10.0.0.5:5432"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.client_message().contains("10.0.0.5"));
    }

    #[test]
    fn duplicate_store_errors_map_to_conflict() {
        let err = AuthError::from(StoreError::Duplicate);
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn expired_links_render_as_not_found() {
        assert_eq!(AuthError::LinkExpired.kind(), ErrorKind::NotFound);
        assert_eq!(AuthError::LinkExpired.client_message(), "This link expired.");
    }
}
