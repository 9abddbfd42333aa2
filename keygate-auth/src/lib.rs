//! Authentication core for Keygate.
//!
//! Provides password hashing and verification, identity reconciliation
//! across local and federated logins, single-use expiring tokens for
//! email-verification and password-reset flows, session establishment with
//! fixation protection, and CSRF/origin validation.
//!
//! The crate does not terminate HTTP. A routing layer drives the
//! operation-level calls exposed by [`services::flows::AuthFlows`] and the
//! individual services, and owns cookies, templates, and transport concerns.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod email;
pub mod error;
pub mod input;
pub mod services;
pub mod store;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an identity authenticates. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginType {
    /// Email + password credentials held by this service.
    Local,
    /// Federated login through Facebook.
    Facebook,
    /// Federated login through Google.
    Google,
}

impl LoginType {
    /// Whether the identity holds a password digest here.
    #[must_use]
    pub const fn is_local(self) -> bool {
        matches!(self, Self::Local)
    }

    /// Stable lowercase name used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Facebook => "facebook",
            Self::Google => "google",
        }
    }
}

impl std::str::FromStr for LoginType {
    type Err = UnknownLoginType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "facebook" => Ok(Self::Facebook),
            "google" => Ok(Self::Google),
            _ => Err(UnknownLoginType),
        }
    }
}

impl std::fmt::Display for LoginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A login type string that is not one of the supported variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown login type")]
pub struct UnknownLoginType;

/// One registered principal's authentication record.
///
/// Distinct from the user-visible [`Profile`]: this record carries the
/// credentials and the login-type lock, nothing presentation-facing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque stable identifier, assigned at creation.
    pub id: Uuid,
    /// Login email. Unique across all identities.
    pub email: String,
    /// Display name. Not guaranteed unique.
    pub username: String,
    /// Serialized digest record. `None` iff `login_type` is federated.
    pub password_digest: Option<String>,
    /// How this identity authenticates. Never changes once set.
    pub login_type: LoginType,
    /// Whether the current email address has been confirmed.
    pub email_verified: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Minimal profile record kept in the profile store, keyed by identity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Identity id this profile belongs to.
    pub id: Uuid,
    /// Display name copied at creation.
    pub username: String,
}

/// The authenticated subject attached to a session after login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Identity id.
    pub id: Uuid,
    /// Login email at the time of authentication.
    pub email: String,
}

/// Server-side session record, addressed by an opaque id delivered via
/// cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub session_id: String,
    /// Authenticated subject, present once logged in.
    pub principal: Option<Principal>,
    /// CSRF token minted for this session.
    pub csrf_token: String,
    /// Arbitrary non-auth data. Survives regeneration on login.
    pub data: HashMap<String, String>,
    /// Session creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Session expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    const ID_BYTES: usize = 32;
    const CSRF_BYTES: usize = 32;

    /// Create a fresh anonymous session with the given TTL.
    #[must_use]
    pub fn new(ttl_seconds: u64) -> Self {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        use rand::Rng;

        let mut id_bytes = [0u8; Self::ID_BYTES];
        let mut csrf_bytes = [0u8; Self::CSRF_BYTES];
        rand::rng().fill(&mut id_bytes[..]);
        rand::rng().fill(&mut csrf_bytes[..]);

        let now = Utc::now();
        let ttl = chrono::Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX));

        Self {
            session_id: URL_SAFE_NO_PAD.encode(id_bytes),
            principal: None,
            csrf_token: URL_SAFE_NO_PAD.encode(csrf_bytes),
            data: HashMap::new(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check if the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Whether a principal is attached.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }
}

pub use error::{AuthError, ErrorKind};
pub use services::csrf::{CsrfGuard, RequestContext};
pub use services::flows::AuthFlows;
pub use services::identity::{IdentityService, SocialProfile, SocialProvider};
pub use services::password::PasswordService;
pub use services::session::SessionManager;
pub use services::tokens::{TokenIssuer, TokenPurpose};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_unpadded() {
        let a = Session::new(3600);
        let b = Session::new(3600);
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.csrf_token, b.csrf_token);
        assert!(!a.session_id.contains('='));
        // 32 bytes -> 43 base64url characters without padding
        assert_eq!(a.session_id.len(), 43);
    }

    #[test]
    fn fresh_session_is_anonymous_and_live() {
        let session = Session::new(3600);
        assert!(!session.is_authenticated());
        assert!(!session.is_expired());
    }

    #[test]
    fn login_type_round_trips_through_storage_name() {
        for lt in [LoginType::Local, LoginType::Facebook, LoginType::Google] {
            assert_eq!(lt.as_str().parse::<LoginType>().unwrap(), lt);
        }
        assert!("github".parse::<LoginType>().is_err());
    }
}
