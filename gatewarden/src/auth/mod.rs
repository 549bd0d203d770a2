pub mod api;
pub mod authenticator;
pub mod events;
pub mod grants;
pub mod password;
pub mod session;
pub mod store;

pub use api::{ApiAuthenticator, ApiIdentity, ApiRequest, SignatureDigest};
pub use authenticator::{Authenticator, LoginFieldCheck, PasswordReset};
pub use events::{AuditLog, AuthEvents, LoginEvent, NullEvents};
pub use grants::{GrantEvaluator, GrantList, GrantSet};
pub use password::HashScheme;
pub use session::{CookieStore, MemoryCookies, MemorySession, SessionStore};
pub use store::{
    ApiCredential, ApiCredentialRepository, GrantRepository, HeaderRule, MemoryApiCredentialStore,
    MemoryGrantStore, MemoryUserStore, RoleId, UserId, UserRecord, UserRepository,
};

/// Resolved identity state for the current request.
///
/// Owned by the authenticator instance that established it; cleared
/// entirely on logout and never shared across requests.
#[derive(Debug, Clone)]
pub struct Identity {
    pub userid: UserId,
    pub username: String,
    pub role_ids: Vec<RoleId>,
    pub user: UserRecord,
}

impl Identity {
    pub fn from_record(record: &UserRecord, username: &str) -> Self {
        Self {
            userid: record.userid,
            username: username.to_string(),
            role_ids: record.role_ids.clone(),
            user: record.clone(),
        }
    }
}
