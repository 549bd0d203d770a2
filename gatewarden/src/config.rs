use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::auth::api::SignatureDigest;
use crate::auth::grants::GrantList;

/// Top-level configuration for the authorization core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub account: AccountConfig,
    /// Route namespace prefix (e.g. `admin_`) separating a firewalled
    /// area from public routes sharing component names.
    pub firewall: String,
    pub cookies: CookieConfig,
    pub password: PasswordConfig,
    /// Grant seeds applied before any store lookup.
    pub grants: GrantSeeds,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Fields a login identifier is matched against, OR-ed together.
    pub login_fields: Vec<String>,
    /// Minimum accepted length per login field, applied by the
    /// availability probe.
    pub min_field_len: HashMap<String, usize>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            login_fields: vec!["username".to_string()],
            min_field_len: HashMap::new(),
        }
    }
}

impl AccountConfig {
    /// Configured login fields, falling back to `username` when empty.
    pub fn login_fields(&self) -> Vec<String> {
        if self.login_fields.is_empty() {
            vec!["username".to_string()]
        } else {
            self.login_fields.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Login-identifier cookie name.
    pub name: String,
    /// Derived-key cookie name.
    pub key: String,
    /// Auxiliary uid cookie, expired on logout.
    pub uid: String,
    pub ttl_secs: u64,
    pub path: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "uname".to_string(),
            key: "ukey".to_string(),
            uid: "uid".to_string(),
            ttl_secs: 30 * 24 * 60 * 60,
            path: "/".to_string(),
        }
    }
}

/// Which scheme newly stored password hashes use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashSchemePreference {
    Bcrypt,
    Legacy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    pub scheme: HashSchemePreference,
    /// Generated password length.
    pub length: usize,
    /// Include `!@#$%^&*()` in generated passwords.
    pub special_chars: bool,
    pub activation_key_length: usize,
    /// Re-hash MD5-era passwords with the preferred scheme after a
    /// successful plaintext login.
    pub upgrade_legacy_on_login: bool,
    /// Legacy compatibility switch: when false, the legacy scheme writes
    /// a bare MD5 with no movable salt token.
    pub salting: bool,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            scheme: HashSchemePreference::Bcrypt,
            length: 12,
            special_chars: false,
            activation_key_length: 9,
            upgrade_legacy_on_login: true,
            salting: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantSeeds {
    pub public: GrantList,
    pub user: GrantList,
    pub role: GrantList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Public `component.view` methods beyond the built-in account
    /// endpoints.
    pub public_methods: Vec<String>,
    /// TTL for the credential-validation cache; `None` disables caching.
    pub cache_ttl_secs: Option<u64>,
    pub default_digest: SignatureDigest,
    /// Composite keys are resolved by token alone, skipping the password
    /// check.
    pub user_only: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            public_methods: Vec::new(),
            cache_ttl_secs: None,
            default_digest: SignatureDigest::Sha256,
            user_only: false,
        }
    }
}

impl WardenConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: WardenConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// The requested component with the firewall prefix applied.
    pub fn firewalled(&self, component: &str) -> String {
        format!("{}{}", self.firewall, component)
    }
}
