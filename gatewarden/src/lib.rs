//! Gatewarden: per-request authentication and grant evaluation.
//!
//! Three cooperating pieces form the crate:
//!
//! - [`Authenticator`] verifies username/password or carried
//!   cookie/session pairs against an injected user store and manages the
//!   login/logout side effects.
//! - [`GrantEvaluator`] computes an effective grant set (public + role +
//!   user scopes, each with include/exclude lists) and decides whether a
//!   `component:view:task` request is permitted; exclude beats include,
//!   unmatched requests are denied.
//! - [`ApiAuthenticator`] authenticates machine requests bearing an API
//!   key and, when required, an HMAC signature over the canonicalized
//!   request parameters.
//!
//! All persistence, session, cookie, time, and randomness concerns are
//! injected through traits; construct the pieces per request and drop
//! them with it.

pub mod auth;
pub mod config;
pub mod core;

pub use auth::api::{ApiAuthenticator, ApiIdentity, ApiRequest, SignatureDigest};
pub use auth::authenticator::{Authenticator, LoginFieldCheck, PasswordReset};
pub use auth::events::{AuditLog, AuthEvents, LoginEvent, NullEvents};
pub use auth::grants::{GrantEvaluator, GrantList, GrantSet};
pub use auth::password::HashScheme;
pub use auth::session::{CookieStore, MemoryCookies, MemorySession, SessionStore};
pub use auth::store::{
    ApiCredential, ApiCredentialRepository, GrantRepository, HeaderRule, MemoryApiCredentialStore,
    MemoryGrantStore, MemoryUserStore, RoleId, UserId, UserRecord, UserRepository,
};
pub use auth::Identity;
pub use config::{HashSchemePreference, WardenConfig};
pub use crate::core::{
    ApiErrorCode, Clock, ManualClock, RandomSource, Result, SystemClock, SystemRandom, WardenError,
};
