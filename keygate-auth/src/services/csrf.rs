//! Cross-origin request protection.
//!
//! Two independent checks run for every state-mutating request:
//!
//! 1. Origin cross-check: the host named by `Origin` (or `Referer`) must
//!    equal the request's own target host (`X-Forwarded-Host` wins over
//!    `Host`). This applies to every non-idempotent request, mobile
//!    clients included.
//! 2. Double-submit token: the session's CSRF token must be presented
//!    again in a header or form field. Mobile clients are exempt from
//!    this check only; so is the reset-password submission, which is
//!    guarded by its one-time ticket instead (the routing layer calls
//!    [`CsrfGuard::validate_origin`] alone for that endpoint).
//!
//! Idempotent methods (GET, HEAD, OPTIONS) skip both checks.

use http::{Method, Uri};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::AuthError;
use crate::Session;

/// Request metadata the guard needs; extracted by the routing layer.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    /// Request method.
    pub method: Method,
    /// `Host` header.
    pub host: Option<&'a str>,
    /// `X-Forwarded-Host` header, set by a fronting proxy.
    pub forwarded_host: Option<&'a str>,
    /// `Origin` header.
    pub origin: Option<&'a str>,
    /// `Referer` header.
    pub referer: Option<&'a str>,
    /// Whether the request comes from a mobile client context.
    pub mobile: bool,
    /// CSRF token presented via header or form field.
    pub csrf_token: Option<&'a str>,
}

/// Validates request provenance for state-mutating operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrfGuard;

impl CsrfGuard {
    /// Create a guard.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run the full check: origin cross-check plus double-submit token.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Unauthorized`] on any missing or
    /// mismatched proof.
    pub fn validate(&self, session: &Session, request: &RequestContext<'_>) -> Result<(), AuthError> {
        if is_idempotent(&request.method) {
            return Ok(());
        }

        self.validate_origin(request)?;

        if request.mobile {
            // Mobile clients cannot reliably carry the synchronizer token;
            // the origin check above still applies to them.
            return Ok(());
        }

        let Some(presented) = request.csrf_token else {
            warn!("state-mutating request without a CSRF token");
            return Err(AuthError::Unauthorized);
        };

        let stored = session.csrf_token.as_bytes();
        let presented = presented.as_bytes();
        if stored.len() != presented.len() || !bool::from(stored.ct_eq(presented)) {
            warn!(session = %session.session_id, "CSRF token mismatch");
            return Err(AuthError::Unauthorized);
        }

        Ok(())
    }

    /// Run only the origin cross-check.
    ///
    /// # Errors
    ///
    /// Fails with [`AuthError::Unauthorized`] when the target host is
    /// unknown, the source origin is unknown, or the two differ.
    pub fn validate_origin(&self, request: &RequestContext<'_>) -> Result<(), AuthError> {
        if is_idempotent(&request.method) {
            return Ok(());
        }

        let Some(target) = request.forwarded_host.or(request.host).filter(|h| !h.is_empty())
        else {
            warn!("request without a target host");
            return Err(AuthError::Unauthorized);
        };

        let source = request
            .origin
            .and_then(host_of)
            .or_else(|| request.referer.and_then(host_of));
        let Some(source) = source else {
            warn!("state-mutating request without origin or referer");
            return Err(AuthError::Unauthorized);
        };

        if !source.eq_ignore_ascii_case(target) {
            warn!(source = %source, target = %target, "origin does not match target host");
            return Err(AuthError::Unauthorized);
        }

        Ok(())
    }
}

fn is_idempotent(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

/// Extract `host[:port]` from an absolute URL, if it has one.
fn host_of(raw: &str) -> Option<String> {
    let uri: Uri = raw.parse().ok()?;
    uri.authority().map(|authority| authority.as_str().to_owned())
}

/// Heuristic mobile-client detection from a user-agent string.
///
/// The routing layer may override the verdict with its own signal (a
/// dedicated app header, say); this mirrors what browsers and webviews
/// actually send.
#[must_use]
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    const MARKERS: [&str; 8] = [
        "android",
        "iphone",
        "ipad",
        "ipod",
        "mobile",
        "webos",
        "blackberry",
        "opera mini",
    ];
    let lowered = user_agent.to_ascii_lowercase();
    MARKERS.iter().any(|marker| lowered.contains(marker))
}
