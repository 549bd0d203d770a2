//! Password hashing, verification, and the legacy movable-salt scheme.
//!
//! Three stored formats coexist: a bare 32-char MD5 from the earliest
//! deployments, the 45-char `md5(password + token) + token` format whose
//! trailing 13 characters double as the salt, and crypt-style (bcrypt)
//! hashes, which are also what new passwords are written as.

use md5::{Digest, Md5};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::{HashSchemePreference, PasswordConfig};
use crate::core::{RandomSource, Result, WardenError};

/// Length of the movable salt token appended to legacy salted hashes.
pub const SALT_TOKEN_LEN: usize = 13;

/// Charset of generated salt tokens (the shape the legacy `uniqid`
/// produced).
const SALT_CHARSET: &[u8] = b"0123456789abcdef";

/// Storage format of a persisted password hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    /// Bare `md5(password)`, exactly 32 hex chars, no salt.
    LegacyMd5,
    /// `md5(password + token) + token` with a trailing movable salt.
    SaltedMd5,
    /// crypt-style hash, anything longer than 50 chars (bcrypt here).
    Crypt,
}

impl HashScheme {
    pub fn detect(stored: &str) -> Self {
        if stored.len() == 32 {
            Self::LegacyMd5
        } else if stored.len() > 50 {
            Self::Crypt
        } else {
            Self::SaltedMd5
        }
    }

    /// MD5-era schemes that should be upgraded on successful login.
    pub fn is_legacy(&self) -> bool {
        !matches!(self, Self::Crypt)
    }
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Byte-for-byte comparison without early exit.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Compose a salted legacy hash from a password and an explicit token.
pub fn salted_md5(password: &str, token: &str) -> String {
    format!("{}{}", md5_hex(&format!("{}{}", password.trim(), token)), token)
}

/// Hash a password in the legacy format with a fresh salt token.
pub fn salt(password: &str, rng: &dyn RandomSource, salting: bool) -> String {
    if !salting {
        return md5_hex(password);
    }
    let token = rng.token(SALT_CHARSET, SALT_TOKEN_LEN);
    salted_md5(password, &token)
}

/// Recompute the value the store would hold if `password` were correct
/// (the legacy `unsalt`). The result doubles as the session/cookie key,
/// so it must equal the stored hash exactly on a match.
pub fn derive_key(password: &str, stored: &str) -> String {
    match HashScheme::detect(stored) {
        HashScheme::LegacyMd5 => md5_hex(password),
        HashScheme::Crypt => {
            // crypt-style salts cannot be re-applied byte-for-byte from
            // here; hand back the stored value itself when it verifies
            // so downstream equality checks hold.
            if bcrypt::verify(password, stored).unwrap_or(false) {
                stored.to_string()
            } else {
                String::new()
            }
        }
        HashScheme::SaltedMd5 => {
            let mut cut = stored.len().saturating_sub(SALT_TOKEN_LEN);
            while !stored.is_char_boundary(cut) {
                cut -= 1;
            }
            let token = &stored[cut..];
            salted_md5(password, token)
        }
    }
}

/// Verify a password against any supported stored format.
pub fn verify(password: &str, stored: &str) -> bool {
    match HashScheme::detect(stored) {
        HashScheme::Crypt => bcrypt::verify(password, stored).unwrap_or(false),
        _ => constant_time_eq(&derive_key(password, stored), stored),
    }
}

/// Hash a password for storage, per the configured scheme preference.
pub fn hash_password(
    password: &str,
    config: &PasswordConfig,
    rng: &dyn RandomSource,
) -> Result<String> {
    match config.scheme {
        HashSchemePreference::Bcrypt => bcrypt::hash(password.trim(), bcrypt::DEFAULT_COST)
            .map_err(|e| WardenError::Internal(format!("failed to hash password: {}", e))),
        HashSchemePreference::Legacy => {
            debug!("writing legacy-format password hash");
            Ok(salt(password, rng, config.salting))
        }
    }
}
