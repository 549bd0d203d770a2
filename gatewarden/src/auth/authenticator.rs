//! Credential and session authentication.
//!
//! Turns a credential claim (username/password, or the cookie/session
//! pair a previous login left behind) into verified identity state, and
//! expires that state on logout. One authenticator serves one request
//! context; every collaborator is injected.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::auth::events::{AuthEvents, LoginEvent, NullEvents};
use crate::auth::grants::GrantEvaluator;
use crate::auth::password::{self, HashScheme};
use crate::auth::session::{CookieStore, SessionStore};
use crate::auth::store::{UserId, UserRecord, UserRepository};
use crate::auth::Identity;
use crate::config::{HashSchemePreference, WardenConfig};
use crate::core::{Clock, RandomSource, Result, SystemClock, SystemRandom, WardenError};

const PASSWORD_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const PASSWORD_SPECIALS: &[u8] = b"!@#$%^&*()";

/// Freshly generated credentials returned by a password reset.
#[derive(Debug, Clone)]
pub struct PasswordReset {
    pub password: String,
    pub activation_key: String,
}

/// Outcome of the registration-time login-field probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginFieldCheck {
    Available,
    /// The named field is missing or below its minimum length.
    Required(String),
    /// Another account already uses the named field's value.
    Exists(String),
}

pub struct Authenticator {
    users: Arc<dyn UserRepository>,
    grants: Arc<GrantEvaluator>,
    session: Arc<dyn SessionStore>,
    cookies: Arc<dyn CookieStore>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    events: Arc<dyn AuthEvents>,
    config: WardenConfig,
    client_ip: IpAddr,
    identity: RwLock<Option<Identity>>,
}

impl Authenticator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        grants: Arc<GrantEvaluator>,
        session: Arc<dyn SessionStore>,
        cookies: Arc<dyn CookieStore>,
        config: WardenConfig,
    ) -> Self {
        Self {
            users,
            grants,
            session,
            cookies,
            clock: Arc::new(SystemClock),
            random: Arc::new(SystemRandom),
            events: Arc::new(NullEvents),
            config,
            client_ip: IpAddr::from([127, 0, 0, 1]),
            identity: RwLock::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn AuthEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn with_client_ip(mut self, client_ip: IpAddr) -> Self {
        self.client_ip = client_ip;
        self
    }

    /// Identity established by this request, if any.
    pub fn identity(&self) -> Option<Identity> {
        self.identity.read().clone()
    }

    pub fn userid(&self) -> Option<UserId> {
        self.identity.read().as_ref().map(|id| id.userid)
    }

    pub fn grants(&self) -> &GrantEvaluator {
        &self.grants
    }

    fn login_fields(&self) -> Vec<String> {
        self.config.account.login_fields()
    }

    fn find_by_login(&self, username: &str) -> Result<Option<UserRecord>> {
        self.users.find_by_login(&self.login_fields(), username)
    }

    fn set_identity(&self, record: &UserRecord, username: &str) {
        *self.identity.write() = Some(Identity::from_record(record, username));
    }

    fn fail_login(&self, username: &str, error: WardenError) -> WardenError {
        self.events.login_failed(username, &error);
        error
    }

    /// Verify a credential claim and commit the login.
    ///
    /// `prehashed` means `password` already is the derived key (the value
    /// a cookie or session carries) rather than a plaintext.
    pub fn log_user_in(
        &self,
        username: &str,
        password: &str,
        remember: bool,
        prehashed: bool,
    ) -> Result<UserRecord> {
        if let Some(outcome) = self.events.before_login(username, password) {
            debug!("login for {} short-circuited by pre-auth hook", username);
            return outcome;
        }

        let Some(row) = self.find_by_login(username)? else {
            return Err(self.fail_login(username, WardenError::CredentialNotFound));
        };

        let mut key = if prehashed {
            password.to_string()
        } else {
            password::derive_key(password, &row.password)
        };
        if !password::constant_time_eq(&key, &row.password) {
            return Err(self.fail_login(username, WardenError::CredentialMismatch));
        }

        // Inactive accounts report their raw status so callers can say
        // more than "wrong password".
        if !row.is_active() {
            return Err(self.fail_login(username, WardenError::AccountInactive(row.status)));
        }

        // Credentials are valid, but the account must still be able to
        // reach the home area before the login is committed.
        if !self.grants.is_allowed("home", "", "", Some(row.userid)) {
            return Err(self.fail_login(username, WardenError::AccessDenied));
        }

        let now = self.clock.now();

        // MD5-era hashes are rewritten with the preferred scheme while
        // the plaintext is at hand. The carried key must track the
        // stored value, so it is swapped along.
        if !prehashed
            && self.config.password.upgrade_legacy_on_login
            && self.config.password.scheme == HashSchemePreference::Bcrypt
            && HashScheme::detect(&row.password).is_legacy()
        {
            let rehashed =
                password::hash_password(password, &self.config.password, &*self.random)?;
            self.users
                .update_password(row.userid, &rehashed, now, None)?;
            debug!("upgraded legacy password hash for user {}", row.userid);
            key = rehashed;
        }

        let cookie_names = &self.config.cookies;
        self.session.set(&cookie_names.name, username);
        self.session.set(&cookie_names.key, &key);
        self.set_identity(&row, username);

        if remember {
            let ttl = Duration::from_secs(cookie_names.ttl_secs);
            self.cookies.set(&cookie_names.name, username, ttl);
            self.cookies.set(&cookie_names.key, &key, ttl);
        }

        self.users
            .update_last_login(row.userid, now, self.client_ip)?;

        self.events.after_login(&LoginEvent {
            userid: row.userid,
            username: username.to_string(),
            client_ip: self.client_ip,
            at: now,
            remembered: remember,
        });

        Ok(row)
    }

    /// Re-verify a carried identifier/key pair against the user store
    /// and repopulate identity state on success.
    fn check_carried_login(&self, username: &str, user_key: &str) -> Result<bool> {
        let Some(row) = self.find_by_login(username)? else {
            return Ok(false);
        };
        if !password::constant_time_eq(user_key, &row.password) {
            return Ok(false);
        }
        if !row.is_active() {
            return Ok(false);
        }
        self.set_identity(&row, username);
        Ok(true)
    }

    /// Reconcile the two identity carriers and report whether a user is
    /// logged in. A present cookie pair is authoritative; the session
    /// pair is only consulted on its own when no cookies are carried.
    /// Verification failure clears both carriers rather than leaving
    /// partial state.
    pub fn is_user_logged_in(&self) -> Result<bool> {
        let names = &self.config.cookies;

        let cookie_pair = match (self.cookies.get(&names.name), self.cookies.get(&names.key)) {
            (Some(name), Some(key)) => Some((name, key)),
            _ => None,
        };

        if let Some((name, key)) = cookie_pair {
            if !self.check_carried_login(&name, &key)? {
                self.logout();
                return Ok(false);
            }
            match (self.session.get(&names.name), self.session.get(&names.key)) {
                (Some(session_name), Some(session_key)) => {
                    if session_name != name || session_key != key {
                        warn!("session and cookie identity disagree, logging out");
                        self.logout();
                        return Ok(false);
                    }
                }
                _ => {
                    self.session.set(&names.name, &name);
                    self.session.set(&names.key, &key);
                }
            }
            return Ok(true);
        }

        if let (Some(name), Some(key)) =
            (self.session.get(&names.name), self.session.get(&names.key))
        {
            if !self.check_carried_login(&name, &key)? {
                self.logout();
                return Ok(false);
            }
            return Ok(true);
        }

        Ok(false)
    }

    /// Clear session state and expire the cookie entries. Calling this
    /// while not logged in is a no-op, not an error.
    pub fn logout(&self) {
        self.events.before_logout();
        self.session.clear();
        let names = &self.config.cookies;
        self.cookies.expire(&names.name);
        self.cookies.expire(&names.key);
        self.cookies.expire(&names.uid);
        *self.identity.write() = None;
    }

    /// Lookup plus optional credential verification and the
    /// active-status gate, without committing any login state.
    pub fn is_valid_user(&self, username: &str, password: Option<&str>) -> Result<UserRecord> {
        let Some(row) = self.find_by_login(username)? else {
            return Err(WardenError::CredentialNotFound);
        };
        if let Some(password) = password {
            if !password::verify(password, &row.password) {
                return Err(WardenError::CredentialMismatch);
            }
        }
        if !row.is_active() {
            return Err(WardenError::AccountInactive(row.status));
        }
        Ok(row)
    }

    /// Verify a plaintext against the current identity's stored hash.
    pub fn is_valid_password(&self, password: &str) -> Result<bool> {
        let userid = self.userid().ok_or(WardenError::AccessDenied)?;
        let row = self
            .users
            .find_by_id(userid)?
            .ok_or(WardenError::CredentialNotFound)?;
        Ok(password::verify(password, &row.password))
    }

    /// Hash and persist a new password for the given user (the current
    /// identity when none is named).
    pub fn update_password(&self, new_password: &str, userid: Option<UserId>) -> Result<()> {
        let userid = userid
            .or_else(|| self.userid())
            .ok_or(WardenError::AccessDenied)?;
        let hash =
            password::hash_password(new_password.trim(), &self.config.password, &*self.random)?;
        self.users
            .update_password(userid, &hash, self.clock.now(), None)?;
        self.events.password_updated(userid);
        Ok(())
    }

    /// Replace the user's password with a fresh random one and issue an
    /// activation key; both plaintexts go back to the caller for
    /// delivery.
    pub fn reset_password(&self, username: &str) -> Result<PasswordReset> {
        let Some(row) = self.find_by_login(username)? else {
            return Err(WardenError::CredentialNotFound);
        };

        let password_config = &self.config.password;
        let new_password =
            self.generate_password(password_config.length, password_config.special_chars);
        let activation_key = self.generate_activation_key();

        let hash = password::hash_password(&new_password, password_config, &*self.random)?;
        self.users
            .update_password(row.userid, &hash, self.clock.now(), Some(&activation_key))?;
        self.events.password_updated(row.userid);

        Ok(PasswordReset {
            password: new_password,
            activation_key,
        })
    }

    /// Random password drawn uniformly from the configured character
    /// set.
    pub fn generate_password(&self, length: usize, special_chars: bool) -> String {
        if special_chars {
            let mut charset = PASSWORD_CHARSET.to_vec();
            charset.extend_from_slice(PASSWORD_SPECIALS);
            self.random.token(&charset, length)
        } else {
            self.random.token(PASSWORD_CHARSET, length)
        }
    }

    pub fn generate_activation_key(&self) -> String {
        self.random
            .token(PASSWORD_CHARSET, self.config.password.activation_key_length)
    }

    /// Registration-time probe: are the login-field values present,
    /// long enough, and unused?
    pub fn check_user_by_login(
        &self,
        data: &HashMap<String, String>,
        exists_only: bool,
    ) -> Result<LoginFieldCheck> {
        let mut fields = self.login_fields();
        if exists_only {
            fields.retain(|field| data.contains_key(field));
        }

        for field in &fields {
            let value = data.get(field).map(String::as_str).unwrap_or("");
            let min = self
                .config
                .account
                .min_field_len
                .get(field)
                .copied()
                .unwrap_or(1)
                .max(1);
            if value.trim().len() < min {
                return Ok(LoginFieldCheck::Required(field.clone()));
            }
        }

        for field in &fields {
            let value = data.get(field).map(String::as_str).unwrap_or("");
            // Existence must be judged the way login resolution matches,
            // or a case-variant registration collides at login time.
            if self
                .users
                .find_by_login(std::slice::from_ref(field), value)?
                .is_some()
            {
                return Ok(LoginFieldCheck::Exists(field.clone()));
            }
        }

        Ok(LoginFieldCheck::Available)
    }

    /// Lookup by a named field; `id`/`userid` resolve through the id
    /// index.
    pub fn get_user_by(&self, field: &str, value: &str) -> Result<Option<UserRecord>> {
        match field {
            "id" | "userid" => match value.parse::<UserId>() {
                Ok(id) => self.users.find_by_id(id),
                Err(_) => Ok(None),
            },
            _ => self.users.find_by_field(field, value),
        }
    }

    pub fn get_user_by_login(&self, username: &str) -> Result<Option<UserRecord>> {
        self.find_by_login(username)
    }

    pub fn username_exists(&self, username: &str) -> Result<Option<UserRecord>> {
        self.users.find_by_field("username", username)
    }

    pub fn email_exists(&self, email: &str) -> Result<Option<UserRecord>> {
        self.users.find_by_field("email", email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::grants::GrantList;
    use crate::auth::password::salted_md5;
    use crate::auth::session::{MemoryCookies, MemorySession};
    use crate::auth::store::{MemoryGrantStore, MemoryUserStore};

    fn fixture() -> (Authenticator, MemoryUserStore, MemoryGrantStore) {
        let users = MemoryUserStore::new();
        let grants = MemoryGrantStore::new();
        grants.set_public(GrantList::include_only(vec!["home"]));
        let config = WardenConfig::default();
        let evaluator = Arc::new(GrantEvaluator::new(Arc::new(grants.clone()), &config));
        let auth = Authenticator::new(
            Arc::new(users.clone()),
            evaluator,
            Arc::new(MemorySession::new()),
            Arc::new(MemoryCookies::new()),
            config,
        );
        (auth, users, grants)
    }

    fn stored_alice() -> UserRecord {
        UserRecord::new(1, "alice", salted_md5("hunter2", "abc1234567890"))
            .with_email("alice@example.com")
    }

    #[test]
    fn test_login_success_sets_identity() {
        let (auth, users, _) = fixture();
        users.insert(stored_alice());

        let row = auth.log_user_in("alice", "hunter2", false, false).unwrap();
        assert_eq!(row.userid, 1);
        let identity = auth.identity().unwrap();
        assert_eq!(identity.userid, 1);
        assert_eq!(identity.username, "alice");
        assert!(users.get(1).unwrap().last_signin.is_some());
    }

    #[test]
    fn test_login_unknown_user() {
        let (auth, _, _) = fixture();
        let err = auth.log_user_in("ghost", "pw", false, false).unwrap_err();
        assert_eq!(err, WardenError::CredentialNotFound);
        assert!(auth.identity().is_none());
    }

    #[test]
    fn test_login_wrong_password() {
        let (auth, users, _) = fixture();
        users.insert(stored_alice());
        let err = auth.log_user_in("alice", "wrong", false, false).unwrap_err();
        assert_eq!(err, WardenError::CredentialMismatch);
    }

    #[test]
    fn test_login_inactive_reports_status() {
        let (auth, users, _) = fixture();
        users.insert(stored_alice().with_status(0));
        let err = auth.log_user_in("alice", "hunter2", false, false).unwrap_err();
        assert_eq!(err, WardenError::AccountInactive(0));
    }

    #[test]
    fn test_login_denied_without_home_grant() {
        let (auth, users, grants) = fixture();
        grants.set_public(GrantList::default());
        users.insert(stored_alice());
        let err = auth.log_user_in("alice", "hunter2", false, false).unwrap_err();
        assert_eq!(err, WardenError::AccessDenied);
        assert!(auth.identity().is_none());
    }

    #[test]
    fn test_login_matches_any_configured_field() {
        let (auth, users, _) = fixture();
        users.insert(stored_alice());
        // Default config matches username only.
        assert!(
            auth.log_user_in("alice@example.com", "hunter2", false, false)
                .is_err()
        );
        assert!(auth.log_user_in("ALICE", "hunter2", false, false).is_ok());
    }

    #[test]
    fn test_legacy_hash_upgraded_on_login() {
        let (auth, users, _) = fixture();
        users.insert(stored_alice());

        auth.log_user_in("alice", "hunter2", false, false).unwrap();
        let stored = users.get(1).unwrap().password;
        assert_eq!(HashScheme::detect(&stored), HashScheme::Crypt);
        // The upgraded hash still authenticates.
        assert!(auth.log_user_in("alice", "hunter2", false, false).is_ok());
    }

    #[test]
    fn test_logout_is_idempotent() {
        let (auth, users, _) = fixture();
        users.insert(stored_alice());
        auth.log_user_in("alice", "hunter2", false, false).unwrap();
        auth.logout();
        assert!(auth.identity().is_none());
        auth.logout();
    }

    #[test]
    fn test_is_valid_user_checks_status() {
        let (auth, users, _) = fixture();
        users.insert(stored_alice().with_status(2));
        let err = auth.is_valid_user("alice", Some("hunter2")).unwrap_err();
        assert_eq!(err, WardenError::AccountInactive(2));
    }

    #[test]
    fn test_reset_password_rotates_credentials() {
        let (auth, users, _) = fixture();
        users.insert(stored_alice());

        let reset = auth.reset_password("alice").unwrap();
        assert_eq!(reset.password.len(), 12);
        assert_eq!(reset.activation_key.len(), 9);

        let row = users.get(1).unwrap();
        assert!(row.last_pw_change.is_some());
        assert_eq!(row.activation_key, Some(reset.activation_key.clone()));
        assert!(auth.log_user_in("alice", &reset.password, false, false).is_ok());
    }

    #[test]
    fn test_reset_password_unknown_user() {
        let (auth, _, _) = fixture();
        assert_eq!(
            auth.reset_password("ghost").unwrap_err(),
            WardenError::CredentialNotFound
        );
    }

    #[test]
    fn test_generate_password_charsets() {
        let (auth, _, _) = fixture();
        let plain = auth.generate_password(24, false);
        assert_eq!(plain.len(), 24);
        assert!(plain.bytes().all(|b| PASSWORD_CHARSET.contains(&b)));

        let special = auth.generate_password(200, true);
        assert_eq!(special.len(), 200);
        assert!(
            special
                .bytes()
                .all(|b| PASSWORD_CHARSET.contains(&b) || PASSWORD_SPECIALS.contains(&b))
        );
    }

    #[test]
    fn test_check_user_by_login() {
        let (auth, users, _) = fixture();
        users.insert(stored_alice());

        let mut data = HashMap::new();
        data.insert("username".to_string(), "".to_string());
        assert_eq!(
            auth.check_user_by_login(&data, false).unwrap(),
            LoginFieldCheck::Required("username".to_string())
        );

        data.insert("username".to_string(), "alice".to_string());
        assert_eq!(
            auth.check_user_by_login(&data, false).unwrap(),
            LoginFieldCheck::Exists("username".to_string())
        );

        // A case variant of a taken name is still taken; it would
        // resolve to the same row at login.
        data.insert("username".to_string(), "  ALICE ".to_string());
        assert_eq!(
            auth.check_user_by_login(&data, false).unwrap(),
            LoginFieldCheck::Exists("username".to_string())
        );

        data.insert("username".to_string(), "brand-new".to_string());
        assert_eq!(
            auth.check_user_by_login(&data, false).unwrap(),
            LoginFieldCheck::Available
        );
    }

    #[test]
    fn test_get_user_by_id_field() {
        let (auth, users, _) = fixture();
        users.insert(stored_alice());
        assert_eq!(
            auth.get_user_by("id", "1").unwrap().map(|u| u.username),
            Some("alice".to_string())
        );
        assert!(auth.get_user_by("id", "not-a-number").unwrap().is_none());
    }
}
