//! API request authentication for machine clients.
//!
//! Resolves an API key (direct, or composite `token:password`) to a
//! credential and its owning account, walks the gate chain (signature
//! presence, secret presence, IP allow-list, custom header, HTTPS), and
//! validates an HMAC signature over the canonicalized request
//! parameters. Independent of cookie/session login state.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use ipnetwork::IpNetwork;
use md5::Md5;
use parking_lot::RwLock;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_encode};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::auth::password::{self, constant_time_eq};
use crate::auth::session::SessionStore;
use crate::auth::store::{
    ApiCredential, ApiCredentialRepository, UserId, UserRecord, UserRepository,
};
use crate::config::WardenConfig;
use crate::core::{Clock, Result, SystemClock, WardenError};

/// Account endpoints every API deployment leaves public, merged with the
/// configured list.
const BUILTIN_PUBLIC: [&str; 6] = [
    "members.register",
    "members.login",
    "members.signin",
    "members.activate",
    "members.resetpass",
    "members.pwreset",
];

/// Request keys that carry authentication rather than payload; they are
/// stripped before the signature payload is canonicalized.
const AUTH_PARAMS: [&str; 10] = [
    "api_key",
    "signature",
    "auth_method",
    "nonce",
    "version",
    "timestamp",
    "format",
    "method",
    "option",
    "view",
];

/// `X-` header fallbacks for each auth field, header names lowercased.
const HEADER_FIELDS: [(&str, &str); 8] = [
    ("api_key", "x-auth-key"),
    ("signature", "x-auth-signature"),
    ("auth_method", "x-auth-method"),
    ("nonce", "x-api-nonce"),
    ("method", "x-api-method"),
    ("option", "x-api-option"),
    ("view", "x-api-view"),
    ("format", "x-api-format"),
];

/// Characters `urlencode` leaves bare; everything else is percent
/// escaped and spaces become `+`.
const URLENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.');

fn urlencode(input: &str) -> String {
    percent_encode(input.as_bytes(), URLENCODE_SET)
        .to_string()
        .replace("%20", "+")
}

/// Digest negotiated for request signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureDigest {
    Sha256,
    Sha1,
    Md5,
}

impl Default for SignatureDigest {
    fn default() -> Self {
        Self::Sha256
    }
}

impl SignatureDigest {
    /// Map an `auth_method` request value to a digest; unknown values
    /// fall back to the configured default.
    pub fn negotiate(auth_method: Option<&str>, default: Self) -> Self {
        match auth_method
            .map(|method| method.to_ascii_uppercase())
            .as_deref()
        {
            Some("HMAC-SHA256") => Self::Sha256,
            Some("HMAC-SHA1") => Self::Sha1,
            Some("HMAC-MD5") => Self::Md5,
            _ => default,
        }
    }

    /// Lowercase hex HMAC of `payload` under `secret`.
    pub fn sign(&self, secret: &str, payload: &str) -> Result<String> {
        let hex = match self {
            Self::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                    .map_err(|e| WardenError::Internal(format!("hmac key: {}", e)))?;
                mac.update(payload.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            Self::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
                    .map_err(|e| WardenError::Internal(format!("hmac key: {}", e)))?;
                mac.update(payload.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            Self::Md5 => {
                let mut mac = Hmac::<Md5>::new_from_slice(secret.as_bytes())
                    .map_err(|e| WardenError::Internal(format!("hmac key: {}", e)))?;
                mac.update(payload.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
        };
        Ok(hex)
    }
}

/// One inbound machine request, reduced to what authentication needs.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub api_key: Option<String>,
    pub signature: Option<String>,
    pub auth_method: Option<String>,
    pub nonce: Option<String>,
    /// Raw dotted method value (`blog.list`), when the client sent one.
    pub method: Option<String>,
    /// Requested component, once resolved.
    pub component: Option<String>,
    pub view: Option<String>,
    /// Non-header request parameters, as received.
    pub params: HashMap<String, String>,
    /// Request headers, names lowercased.
    pub headers: HashMap<String, String>,
    pub client_ip: IpAddr,
    pub https: bool,
    pub server_port: u16,
}

impl Default for ApiRequest {
    fn default() -> Self {
        Self {
            api_key: None,
            signature: None,
            auth_method: None,
            nonce: None,
            method: None,
            component: None,
            view: None,
            params: HashMap::new(),
            headers: HashMap::new(),
            client_ip: IpAddr::from([127, 0, 0, 1]),
            https: false,
            server_port: 80,
        }
    }
}

impl ApiRequest {
    pub fn new(client_ip: IpAddr) -> Self {
        Self {
            client_ip,
            ..Self::default()
        }
    }

    /// Build a request from raw parameters and headers, filling each
    /// auth field from its `X-` header when the parameter is absent.
    pub fn from_parts(
        params: HashMap<String, String>,
        headers: HashMap<String, String>,
        client_ip: IpAddr,
    ) -> Self {
        let mut request = Self {
            params,
            headers,
            client_ip,
            ..Self::default()
        };

        let pick = |request: &Self, field: &str, header: &str| -> Option<String> {
            request
                .params
                .get(field)
                .filter(|value| !value.is_empty())
                .cloned()
                .or_else(|| request.headers.get(header).cloned())
        };

        for (field, header) in HEADER_FIELDS {
            let value = pick(&request, field, header);
            match field {
                "api_key" => request.api_key = value,
                "signature" => request.signature = value,
                "auth_method" => request.auth_method = value,
                "nonce" => request.nonce = value,
                "method" => request.method = value,
                "option" => request.component = value,
                "view" => request.view = value,
                _ => {}
            }
        }

        if let Some(auth) = request.headers.get("authorization").cloned() {
            request = request.apply_authorization(&auth);
        }

        request.normalize()
    }

    /// Split an `Authorization: <type> key:signature` header value into
    /// the key and signature fields.
    pub fn apply_authorization(mut self, header: &str) -> Self {
        if let Some((_, credentials)) = header.split_once(' ') {
            if let Some((key, signature)) = credentials.split_once(':') {
                self.api_key = Some(key.to_string());
                self.signature = Some(signature.to_string());
            }
        }
        self
    }

    /// Resolve component/view from the dotted `option` or `method`
    /// value.
    pub fn normalize(mut self) -> Self {
        if let Some(option) = self.component.clone() {
            let lower = option.to_lowercase();
            if let Some((component, view)) = lower.split_once('.') {
                self.component = Some(component.to_string());
                if !view.is_empty() {
                    self.view = Some(view.to_string());
                }
            } else {
                self.component = Some(lower);
            }
        } else if let Some(method) = self.method.clone() {
            let lower = method.to_lowercase();
            let (component, view) = lower.split_once('.').unwrap_or((lower.as_str(), ""));
            self.component = Some(component.to_string());
            if !view.is_empty() {
                self.view = Some(view.to_string());
            }
        }
        self
    }

    fn dotted(&self) -> (String, String) {
        (
            self.component.clone().unwrap_or_default().to_lowercase(),
            self.view.clone().unwrap_or_default().to_lowercase(),
        )
    }
}

/// The principal resolved by a successful API authentication.
#[derive(Debug, Clone)]
pub struct ApiIdentity {
    pub user: Option<UserRecord>,
    pub credential: Option<ApiCredential>,
}

impl ApiIdentity {
    /// Identity of a request admitted through the public allow-list.
    pub fn public() -> Self {
        Self {
            user: None,
            credential: None,
        }
    }

    pub fn is_public(&self) -> bool {
        self.user.is_none()
    }

    pub fn userid(&self) -> Option<UserId> {
        self.user.as_ref().map(|user| user.userid)
    }
}

#[derive(Debug, Clone)]
struct ResolvedCredential {
    credential: ApiCredential,
    user: UserRecord,
}

struct CachedValidation {
    outcome: Result<ResolvedCredential>,
    expires_at: DateTime<Utc>,
}

/// Public allow-list state: a list to merge with the built-ins, or
/// disabled entirely.
enum PublicMethods {
    Disabled,
    List(Vec<String>),
}

pub struct ApiAuthenticator {
    credentials: Arc<dyn ApiCredentialRepository>,
    users: Arc<dyn UserRepository>,
    session: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    config: WardenConfig,
    public_methods: RwLock<PublicMethods>,
    user_only: RwLock<bool>,
    cache: RwLock<HashMap<(String, IpAddr), CachedValidation>>,
}

impl ApiAuthenticator {
    pub fn new(
        credentials: Arc<dyn ApiCredentialRepository>,
        users: Arc<dyn UserRepository>,
        session: Arc<dyn SessionStore>,
        config: WardenConfig,
    ) -> Self {
        let public = PublicMethods::List(config.api.public_methods.clone());
        let user_only = config.api.user_only;
        Self {
            credentials,
            users,
            session,
            clock: Arc::new(SystemClock),
            config,
            public_methods: RwLock::new(public),
            user_only: RwLock::new(user_only),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the public allow-list; `None` disables it so every
    /// request must authenticate.
    pub fn set_public_methods(&self, methods: Option<Vec<String>>) {
        *self.public_methods.write() = match methods {
            Some(list) => PublicMethods::List(list),
            None => PublicMethods::Disabled,
        };
    }

    pub fn add_public_method(&self, method: impl Into<String>) {
        if let PublicMethods::List(list) = &mut *self.public_methods.write() {
            list.push(method.into());
        }
    }

    /// Resolve composite keys by token alone, skipping the password
    /// check.
    pub fn set_user_only(&self, user_only: bool) {
        *self.user_only.write() = user_only;
    }

    fn is_public(&self, request: &ApiRequest) -> bool {
        let methods = self.public_methods.read();
        let PublicMethods::List(extra) = &*methods else {
            return false;
        };

        let (component, view) = request.dotted();
        let candidates = [
            format!("{}.{}", component, view),
            format!("{}.*", component),
        ];

        let listed = |method: &str| {
            BUILTIN_PUBLIC.contains(&method) || extra.iter().any(|m| m == method)
        };

        candidates.iter().any(|candidate| listed(candidate))
            || request
                .method
                .as_deref()
                .is_some_and(|method| listed(&method.to_lowercase()))
    }

    /// Authenticate a machine request. Returns the resolved identity or
    /// the first failed gate's coded error.
    pub fn authenticate(&self, request: &ApiRequest) -> Result<ApiIdentity> {
        if self.is_public(request) {
            debug!("public api method, no credential required");
            return Ok(ApiIdentity::public());
        }

        let Some(api_key) = request.api_key.as_deref().filter(|key| !key.is_empty()) else {
            warn!("api request without key from {}", request.client_ip);
            return Err(WardenError::CredentialNotFound);
        };

        let resolved = match self.resolve_cached(api_key, request.client_ip) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!("api credential rejected for {}: {}", request.client_ip, err);
                return Err(err);
            }
        };

        let credential = &resolved.credential;

        if credential.require_signature {
            if request
                .signature
                .as_deref()
                .filter(|s| !s.is_empty())
                .is_none()
            {
                return Err(WardenError::SignatureMissing);
            }
            if credential.api_secret.is_none() {
                return Err(WardenError::ConfigurationInvalid(
                    "api secret not configured".to_string(),
                ));
            }
        }

        self.check_ip(credential, request.client_ip)?;
        self.check_header(credential, &request.headers)?;
        self.check_protocol(credential, request)?;

        if credential.require_signature {
            let secret = credential.api_secret.as_deref().unwrap_or_default();
            let expected = self.compute_signature(request, secret)?;
            let supplied = request.signature.as_deref().unwrap_or_default();
            if !constant_time_eq(supplied, &expected) {
                warn!("api signature mismatch for key {}", credential.id);
                return Err(WardenError::SignatureInvalid);
            }
        }

        self.session.set("is_user_logged_in", "1");
        self.session.set("userid", &resolved.user.userid.to_string());
        debug!("api request authenticated as user {}", resolved.user.userid);

        Ok(ApiIdentity {
            user: Some(resolved.user),
            credential: Some(resolved.credential),
        })
    }

    /// Credential resolution with the optional TTL memo. Only the store
    /// lookups are cached; per-request gates and the signature check
    /// always run.
    fn resolve_cached(&self, api_key: &str, client_ip: IpAddr) -> Result<ResolvedCredential> {
        let Some(ttl) = self.config.api.cache_ttl_secs else {
            return self.resolve_credential(api_key);
        };

        let now = self.clock.now();
        let cache_key = (api_key.to_string(), client_ip);

        if let Some(hit) = self.cache.read().get(&cache_key) {
            if hit.expires_at > now {
                debug!("api credential cache hit for {}", client_ip);
                return hit.outcome.clone();
            }
        }

        let outcome = self.resolve_credential(api_key);
        // Hard store failures stay uncached so a flapping backend
        // recovers as soon as it comes back.
        if !matches!(outcome, Err(WardenError::Store(_) | WardenError::Internal(_))) {
            self.cache.write().insert(
                cache_key,
                CachedValidation {
                    outcome: outcome.clone(),
                    expires_at: now + Duration::seconds(ttl as i64),
                },
            );
        }
        outcome
    }

    /// Resolve an API key to its credential and owning account. Every
    /// miss fails closed as a suspended account.
    fn resolve_credential(&self, api_key: &str) -> Result<ResolvedCredential> {
        if let Some((token, password)) = api_key.split_once(':') {
            let user = if password == "x" {
                // Pre-validated token: identification only.
                self.users
                    .find_by_field("token", token)?
                    .ok_or(WardenError::AccountInactive(0))?
            } else {
                let fields = self.config.account.login_fields();
                let row = self
                    .users
                    .find_by_login(&fields, token)?
                    .ok_or(WardenError::AccountInactive(0))?;
                if !*self.user_only.read() && !password::verify(password, &row.password) {
                    return Err(WardenError::AccountInactive(0));
                }
                row
            };
            if !user.is_active() {
                return Err(WardenError::AccountInactive(user.status));
            }
            // Composite keys carry no credential row; synthesize an
            // unrestricted one bound to the resolved account.
            let credential = ApiCredential::new(api_key, user.userid);
            return Ok(ResolvedCredential { credential, user });
        }

        let credential = self
            .credentials
            .find_by_key(api_key)?
            .ok_or(WardenError::AccountInactive(0))?;
        if !credential.is_active() {
            return Err(WardenError::AccountInactive(credential.status));
        }
        let user = self
            .users
            .find_by_id(credential.user_id)?
            .ok_or(WardenError::AccountInactive(0))?;
        if !user.is_active() {
            return Err(WardenError::AccountInactive(user.status));
        }
        Ok(ResolvedCredential { credential, user })
    }

    fn check_ip(&self, credential: &ApiCredential, client_ip: IpAddr) -> Result<()> {
        if credential.allowed_ips.is_empty() {
            return Ok(());
        }
        let literal = client_ip.to_string();
        for entry in &credential.allowed_ips {
            let entry = entry.trim();
            if entry == literal {
                return Ok(());
            }
            if let Ok(network) = IpNetwork::from_str(entry) {
                if network.contains(client_ip) {
                    return Ok(());
                }
            }
            if let Some(prefix) = entry.strip_suffix('*') {
                if literal.starts_with(prefix) {
                    return Ok(());
                }
            }
        }
        Err(WardenError::IpNotAllowed(literal))
    }

    fn check_header(
        &self,
        credential: &ApiCredential,
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        let Some(rule) = &credential.required_header else {
            return Ok(());
        };
        let held = headers
            .get(&rule.name.to_ascii_lowercase())
            .or_else(|| headers.get(&rule.name));
        if held.map(String::as_str) != Some(rule.value.as_str()) {
            return Err(WardenError::HeaderMismatch);
        }
        Ok(())
    }

    fn check_protocol(&self, credential: &ApiCredential, request: &ApiRequest) -> Result<()> {
        if credential.https_only && (!request.https || request.server_port != 443) {
            return Err(WardenError::ProtocolNotAllowed);
        }
        Ok(())
    }

    /// Canonical signature payload: auth-carrying keys stripped, keys
    /// lowercased and sorted, urlencoded, base64'd, then newline-joined
    /// with the key and nonce.
    pub fn signature_payload(request: &ApiRequest) -> String {
        let mut sorted = BTreeMap::new();
        for (key, value) in &request.params {
            let key = key.to_lowercase();
            if !AUTH_PARAMS.contains(&key.as_str()) {
                sorted.insert(key, value.clone());
            }
        }

        let query = sorted
            .iter()
            .map(|(key, value)| format!("{}={}", urlencode(key), urlencode(value)))
            .collect::<Vec<_>>()
            .join("&");
        let encoded = general_purpose::STANDARD.encode(query);

        let api_key = request.api_key.clone().unwrap_or_default();
        let nonce = request.nonce.clone().unwrap_or_default();
        [api_key, nonce, encoded].join("\n")
    }

    /// Compute the signature this authenticator expects for `request`.
    /// Clients can call this with their secret to produce a matching
    /// one.
    pub fn compute_signature(&self, request: &ApiRequest, secret: &str) -> Result<String> {
        let digest = SignatureDigest::negotiate(
            request.auth_method.as_deref(),
            self.config.api.default_digest,
        );
        digest.sign(secret, &Self::signature_payload(request))
    }
}
