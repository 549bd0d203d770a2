use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Gatewarden operations.
///
/// Authorization outcomes (missing credentials, failed gates, denied
/// grants) are expected results that the embedding layer maps to
/// user-visible responses. Only `Store` and `Internal` represent
/// genuinely unexpected conditions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WardenError {
    #[error("credential not found")]
    CredentialNotFound,

    #[error("credential mismatch")]
    CredentialMismatch,

    #[error("account inactive (status {0})")]
    AccountInactive(i64),

    #[error("access denied")]
    AccessDenied,

    #[error("signature not found")]
    SignatureMissing,

    #[error("signature mismatch")]
    SignatureInvalid,

    #[error("request not allowed from {0}")]
    IpNotAllowed(String),

    #[error("header misconfigured")]
    HeaderMismatch,

    #[error("protocol not allowed")]
    ProtocolNotAllowed,

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Machine-readable token for the variants that surface through the
    /// API authenticator.
    pub fn api_code(&self) -> Option<ApiErrorCode> {
        match self {
            Self::CredentialNotFound => Some(ApiErrorCode::A402),
            Self::SignatureMissing => Some(ApiErrorCode::A403),
            Self::AccountInactive(_) => Some(ApiErrorCode::A404),
            Self::ConfigurationInvalid(_) => Some(ApiErrorCode::A405),
            Self::IpNotAllowed(_) => Some(ApiErrorCode::A406),
            Self::HeaderMismatch => Some(ApiErrorCode::A407),
            Self::ProtocolNotAllowed => Some(ApiErrorCode::A407A),
            Self::SignatureInvalid => Some(ApiErrorCode::A408),
            _ => None,
        }
    }

    /// Whether this is an expected authorization outcome rather than a
    /// hard failure.
    pub fn is_denial(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::Internal(_))
    }
}

/// Machine-readable status tokens of the API response contract.
///
/// `A400`/`A400A`/`A401A`/`A401B` belong to endpoint resolution in the
/// embedding layer; they are listed here because clients consume one
/// status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiErrorCode {
    A400,
    A400A,
    A401A,
    A401B,
    A402,
    A403,
    A404,
    A405,
    A406,
    A407,
    A407A,
    A408,
}

impl ApiErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A400 => "A400",
            Self::A400A => "A400A",
            Self::A401A => "A401A",
            Self::A401B => "A401B",
            Self::A402 => "A402",
            Self::A403 => "A403",
            Self::A404 => "A404",
            Self::A405 => "A405",
            Self::A406 => "A406",
            Self::A407 => "A407",
            Self::A407A => "A407A",
            Self::A408 => "A408",
        }
    }

    /// HTTP status the embedding layer should respond with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::A400 | Self::A400A | Self::A401A | Self::A401B => 400,
            _ => 401,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::A400 => "Api Not Implemented",
            Self::A400A => "Api Not Found",
            Self::A401A => "Method Not Implemented",
            Self::A401B => "Method Not Found",
            Self::A402 => "Api Key not found",
            Self::A403 => "Api Signature not found",
            Self::A404 => "Your api account got suspended",
            Self::A405 => "Api secret not found",
            Self::A406 => "Request is not allowed from this ip",
            Self::A407 => "Header misconfigured",
            Self::A407A => "Protocol not allowed",
            Self::A408 => "Api Signature not equal",
        }
    }
}

impl std::fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for Gatewarden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
