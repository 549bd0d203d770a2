//! Lifecycle notifications around authentication state changes.

use chrono::{DateTime, Utc};
use std::net::IpAddr;
use tracing::{debug, info, warn};

use crate::auth::store::{UserId, UserRecord};
use crate::core::{Result, WardenError};

/// Details handed to `after_login` subscribers.
#[derive(Debug, Clone)]
pub struct LoginEvent {
    pub userid: UserId,
    pub username: String,
    pub client_ip: IpAddr,
    pub at: DateTime<Utc>,
    pub remembered: bool,
}

/// Subscriber hooks for the authenticator.
///
/// `before_login` runs before any store lookup and may short-circuit the
/// whole flow with a caller-supplied outcome. `after_login` fires exactly
/// once per fully committed login and never on failure.
pub trait AuthEvents: Send + Sync {
    fn before_login(&self, _username: &str, _password: &str) -> Option<Result<UserRecord>> {
        None
    }

    fn login_failed(&self, _username: &str, _error: &WardenError) {}

    fn after_login(&self, _event: &LoginEvent) {}

    fn before_logout(&self) {}

    fn password_updated(&self, _userid: UserId) {}
}

/// No-op subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEvents;

impl AuthEvents for NullEvents {}

/// Default subscriber: writes the audit trail through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditLog;

impl AuthEvents for AuditLog {
    fn login_failed(&self, username: &str, error: &WardenError) {
        warn!("AUDIT: login failure - user: {}, reason: {}", username, error);
    }

    fn after_login(&self, event: &LoginEvent) {
        info!(
            "AUDIT: login success - user: {}, ip: {}",
            event.username, event.client_ip
        );
    }

    fn before_logout(&self) {
        debug!("AUDIT: logout");
    }

    fn password_updated(&self, userid: UserId) {
        info!("AUDIT: password updated - user: {}", userid);
    }
}
