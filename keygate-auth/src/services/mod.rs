//! The authentication services.
//!
//! Leaves first: [`codec`] and [`password`] know nothing above digests;
//! [`tokens`] and [`session`] sit on the expiring store; [`identity`]
//! composes stores and hashing into the reconciliation rules; [`csrf`]
//! guards request provenance; [`flows`] strings everything together for a
//! routing layer.

pub mod codec;
pub mod csrf;
pub mod flows;
pub mod identity;
pub mod password;
pub mod session;
pub mod tokens;

pub use codec::{CodecError, HashScheme};
pub use csrf::{is_mobile_user_agent, CsrfGuard, RequestContext};
pub use flows::AuthFlows;
pub use identity::{IdentityService, SocialProfile, SocialProvider};
pub use password::PasswordService;
pub use session::SessionManager;
pub use tokens::{TokenIssuer, TokenPurpose};
