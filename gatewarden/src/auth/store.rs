//! Account and credential records, and the repository traits the core
//! is handed at construction time.
//!
//! The in-memory stores double as reference implementations and test
//! fixtures; production embeddings wrap their own persistence behind the
//! same traits.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::auth::grants::GrantList;
use crate::core::{Result, WardenError};

pub type UserId = u64;
pub type RoleId = u64;

/// Status value of a usable account.
pub const STATUS_ACTIVE: i64 = 1;

/// A persisted account row, as the user store hands it to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub userid: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Stored password hash (any of the supported formats).
    #[serde(skip_serializing)]
    pub password: String,
    /// 1 = active; anything else is inactive/suspended and is reported
    /// back to login callers as-is.
    pub status: i64,
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
    /// Pre-validated API token, when issued.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub last_signin: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub last_pw_change: Option<DateTime<Utc>>,
    #[serde(default)]
    pub activation_key: Option<String>,
    /// Additional profile fields, including any extra login-identifier
    /// fields named in the account configuration.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl UserRecord {
    pub fn new(userid: UserId, username: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            userid,
            username: username.into(),
            email: None,
            password: password_hash.into(),
            status: STATUS_ACTIVE,
            role_ids: Vec::new(),
            token: None,
            last_signin: None,
            ip: None,
            last_pw_change: None,
            activation_key: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_status(mut self, status: i64) -> Self {
        self.status = status;
        self
    }

    pub fn with_roles(mut self, role_ids: Vec<RoleId>) -> Self {
        self.role_ids = role_ids;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    /// Value of a login-identifier field, by name.
    pub fn login_value(&self, field: &str) -> Option<&str> {
        match field {
            "username" => Some(&self.username),
            "email" => self.email.as_deref(),
            "token" => self.token.as_deref(),
            _ => self.attributes.get(field).map(String::as_str),
        }
    }
}

/// Header equality requirement attached to an API credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    pub name: String,
    pub value: String,
}

/// A machine client's API credential row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredential {
    pub id: Uuid,
    pub api_key: String,
    #[serde(default, skip_serializing)]
    pub api_secret: Option<String>,
    pub user_id: UserId,
    pub status: i64,
    /// Whether requests bearing this key must carry an HMAC signature.
    pub require_signature: bool,
    /// Exact addresses, CIDR blocks, or trailing-`*` patterns; empty
    /// means any address.
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub required_header: Option<HeaderRule>,
    #[serde(default)]
    pub https_only: bool,
}

impl ApiCredential {
    pub fn new(api_key: impl Into<String>, user_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_key: api_key.into(),
            api_secret: None,
            user_id,
            status: STATUS_ACTIVE,
            require_signature: false,
            allowed_ips: Vec::new(),
            required_header: None,
            https_only: false,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.api_secret = Some(secret.into());
        self
    }

    pub fn with_signature_required(mut self) -> Self {
        self.require_signature = true;
        self
    }

    pub fn with_allowed_ips(mut self, allowed: Vec<String>) -> Self {
        self.allowed_ips = allowed;
        self
    }

    pub fn with_required_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.required_header = Some(HeaderRule {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_https_only(mut self) -> Self {
        self.https_only = true;
        self
    }

    pub fn with_status(mut self, status: i64) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// Account lookup and bookkeeping, as the core consumes it.
pub trait UserRepository: Send + Sync {
    /// OR-match `value` across the given login fields. Matching is
    /// trimmed and case-insensitive.
    fn find_by_login(&self, fields: &[String], value: &str) -> Result<Option<UserRecord>>;

    fn find_by_id(&self, userid: UserId) -> Result<Option<UserRecord>>;

    /// Exact-value lookup on a single named field.
    fn find_by_field(&self, field: &str, value: &str) -> Result<Option<UserRecord>>;

    fn update_last_login(&self, userid: UserId, at: DateTime<Utc>, ip: IpAddr) -> Result<()>;

    /// Persist a new password hash. `activation_key` is left untouched
    /// when `None`.
    fn update_password(
        &self,
        userid: UserId,
        hash: &str,
        at: DateTime<Utc>,
        activation_key: Option<&str>,
    ) -> Result<()>;
}

/// Grant documents per scope, as the grant store hands them over.
pub trait GrantRepository: Send + Sync {
    fn public_grants(&self) -> Result<GrantList>;

    fn user_grants(&self, userid: UserId) -> Result<GrantList>;

    /// Roles the user belongs to. One element in single-role mode, any
    /// number in many-to-many mode.
    fn role_ids(&self, userid: UserId) -> Result<Vec<RoleId>>;

    /// Union of the named roles' grants, include and exclude lists
    /// concatenated in role order.
    fn role_grants(&self, roles: &[RoleId]) -> Result<GrantList>;
}

pub trait ApiCredentialRepository: Send + Sync {
    fn find_by_key(&self, api_key: &str) -> Result<Option<ApiCredential>>;
}

/// In-memory user store.
#[derive(Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<RwLock<HashMap<UserId, UserRecord>>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserRecord) {
        debug!("storing user {} ({})", user.userid, user.username);
        self.users.write().insert(user.userid, user);
    }

    pub fn get(&self, userid: UserId) -> Option<UserRecord> {
        self.users.read().get(&userid).cloned()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl UserRepository for MemoryUserStore {
    fn find_by_login(&self, fields: &[String], value: &str) -> Result<Option<UserRecord>> {
        let needle = value.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }
        let users = self.users.read();
        Ok(users
            .values()
            .find(|user| {
                fields.iter().any(|field| {
                    user.login_value(field)
                        .is_some_and(|held| held.trim().to_lowercase() == needle)
                })
            })
            .cloned())
    }

    fn find_by_id(&self, userid: UserId) -> Result<Option<UserRecord>> {
        Ok(self.users.read().get(&userid).cloned())
    }

    fn find_by_field(&self, field: &str, value: &str) -> Result<Option<UserRecord>> {
        let users = self.users.read();
        Ok(users
            .values()
            .find(|user| user.login_value(field) == Some(value))
            .cloned())
    }

    fn update_last_login(&self, userid: UserId, at: DateTime<Utc>, ip: IpAddr) -> Result<()> {
        let mut users = self.users.write();
        let user = users
            .get_mut(&userid)
            .ok_or_else(|| WardenError::Store(format!("user {} not found", userid)))?;
        user.last_signin = Some(at);
        user.ip = Some(ip.to_string());
        Ok(())
    }

    fn update_password(
        &self,
        userid: UserId,
        hash: &str,
        at: DateTime<Utc>,
        activation_key: Option<&str>,
    ) -> Result<()> {
        let mut users = self.users.write();
        let user = users
            .get_mut(&userid)
            .ok_or_else(|| WardenError::Store(format!("user {} not found", userid)))?;
        user.password = hash.to_string();
        user.last_pw_change = Some(at);
        if let Some(key) = activation_key {
            user.activation_key = Some(key.to_string());
        }
        Ok(())
    }
}

/// In-memory grant store.
#[derive(Clone, Default)]
pub struct MemoryGrantStore {
    public: Arc<RwLock<GrantList>>,
    users: Arc<RwLock<HashMap<UserId, GrantList>>>,
    roles: Arc<RwLock<HashMap<RoleId, GrantList>>>,
    memberships: Arc<RwLock<HashMap<UserId, Vec<RoleId>>>>,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_public(&self, grants: GrantList) {
        *self.public.write() = grants;
    }

    pub fn set_user_grants(&self, userid: UserId, grants: GrantList) {
        self.users.write().insert(userid, grants);
    }

    pub fn set_role_grants(&self, role: RoleId, grants: GrantList) {
        self.roles.write().insert(role, grants);
    }

    /// Store a raw grant document as persisted by the legacy schema.
    pub fn set_user_grants_json(&self, userid: UserId, raw: &str) {
        self.set_user_grants(userid, GrantList::from_json_lenient(raw));
    }

    pub fn set_role_grants_json(&self, role: RoleId, raw: &str) {
        self.set_role_grants(role, GrantList::from_json_lenient(raw));
    }

    pub fn assign_role(&self, userid: UserId, role: RoleId) {
        let mut memberships = self.memberships.write();
        let roles = memberships.entry(userid).or_default();
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
}

impl GrantRepository for MemoryGrantStore {
    fn public_grants(&self) -> Result<GrantList> {
        Ok(self.public.read().clone())
    }

    fn user_grants(&self, userid: UserId) -> Result<GrantList> {
        Ok(self.users.read().get(&userid).cloned().unwrap_or_default())
    }

    fn role_ids(&self, userid: UserId) -> Result<Vec<RoleId>> {
        Ok(self
            .memberships
            .read()
            .get(&userid)
            .cloned()
            .unwrap_or_default())
    }

    fn role_grants(&self, roles: &[RoleId]) -> Result<GrantList> {
        let held = self.roles.read();
        let mut merged = GrantList::default();
        for role in roles {
            if let Some(grants) = held.get(role) {
                merged.union(grants.clone());
            }
        }
        Ok(merged)
    }
}

/// In-memory API credential store, indexed by key.
#[derive(Clone, Default)]
pub struct MemoryApiCredentialStore {
    keys: Arc<RwLock<HashMap<String, ApiCredential>>>,
}

impl MemoryApiCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, credential: ApiCredential) {
        debug!("storing api credential {}", credential.id);
        self.keys
            .write()
            .insert(credential.api_key.clone(), credential);
    }
}

impl ApiCredentialRepository for MemoryApiCredentialStore {
    fn find_by_key(&self, api_key: &str) -> Result<Option<ApiCredential>> {
        Ok(self.keys.read().get(api_key).cloned())
    }
}
