// API request authentication: key resolution, signature validation,
// gate errors, and the credential-validation cache

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, Utc};
use gatewarden::auth::password::salted_md5;
use gatewarden::{
    ApiAuthenticator, ApiCredential, ApiCredentialRepository, ApiErrorCode, ApiRequest,
    ManualClock, MemoryApiCredentialStore, MemorySession, MemoryUserStore, Result,
    SignatureDigest, UserRecord, WardenConfig, WardenError,
};

fn fixture(config: WardenConfig) -> (ApiAuthenticator, MemoryUserStore, MemoryApiCredentialStore) {
    let users = MemoryUserStore::new();
    let credentials = MemoryApiCredentialStore::new();
    let api = ApiAuthenticator::new(
        Arc::new(credentials.clone()),
        Arc::new(users.clone()),
        Arc::new(MemorySession::new()),
        config,
    );
    (api, users, credentials)
}

fn keyed_request(key: &str) -> ApiRequest {
    let mut request = ApiRequest::default();
    request.api_key = Some(key.to_string());
    request.component = Some("orders".to_string());
    request.view = Some("list".to_string());
    request
}

// ==================== KEY RESOLUTION ====================

#[test]
fn test_token_x_key_authenticates_without_signature() {
    let (api, users, _) = fixture(WardenConfig::default());
    users.insert(UserRecord::new(7, "svc", "unused").with_token("tok"));

    let identity = api.authenticate(&keyed_request("tok:x")).unwrap();
    assert_eq!(identity.userid(), Some(7));
    let credential = identity.credential.unwrap();
    assert!(!credential.require_signature);
}

#[test]
fn test_composite_key_verifies_stored_password() {
    let (api, users, _) = fixture(WardenConfig::default());
    users.insert(UserRecord::new(
        3,
        "svc",
        salted_md5("machine-pw", "abc1234567890"),
    ));

    assert_eq!(
        api.authenticate(&keyed_request("svc:machine-pw"))
            .unwrap()
            .userid(),
        Some(3)
    );
    let err = api.authenticate(&keyed_request("svc:bad")).unwrap_err();
    assert_eq!(err.api_code(), Some(ApiErrorCode::A404));
}

#[test]
fn test_error_code_surface() {
    let (api, users, credentials) = fixture(WardenConfig::default());

    // No key at all.
    let mut bare = ApiRequest::default();
    bare.component = Some("orders".to_string());
    assert_eq!(
        api.authenticate(&bare).unwrap_err().api_code(),
        Some(ApiErrorCode::A402)
    );

    // Unknown key.
    assert_eq!(
        api.authenticate(&keyed_request("nope")).unwrap_err().api_code(),
        Some(ApiErrorCode::A404)
    );

    // Signature demanded but absent.
    users.insert(UserRecord::new(7, "svc", "unused"));
    credentials.insert(
        ApiCredential::new("k", 7)
            .with_secret("s")
            .with_signature_required(),
    );
    assert_eq!(
        api.authenticate(&keyed_request("k")).unwrap_err().api_code(),
        Some(ApiErrorCode::A403)
    );
}

// ==================== SIGNATURES ====================

#[test]
fn test_signature_deterministic_across_implementations() {
    let (api, _, _) = fixture(WardenConfig::default());

    let mut request = keyed_request("key-1");
    request.nonce = Some("nonce-9".to_string());
    request.params.insert("qty".to_string(), "2".to_string());
    request
        .params
        .insert("Item".to_string(), "blue widget".to_string());

    // An independent client builds the same canonical payload by hand:
    // lowercase keys, sorted, urlencoded, base64'd, newline-joined with
    // key and nonce.
    use base64::{Engine as _, engine::general_purpose};
    let query = "item=blue+widget&qty=2";
    let by_hand = format!("key-1\nnonce-9\n{}", general_purpose::STANDARD.encode(query));
    assert_eq!(ApiAuthenticator::signature_payload(&request), by_hand);

    let ours = api.compute_signature(&request, "secret").unwrap();
    let theirs = SignatureDigest::Sha256.sign("secret", &by_hand).unwrap();
    assert_eq!(ours, theirs);
    // And it is stable across calls.
    assert_eq!(api.compute_signature(&request, "secret").unwrap(), ours);
}

#[test]
fn test_signed_request_round_trip_per_digest() {
    for method in ["HMAC-SHA256", "HMAC-SHA1", "HMAC-MD5"] {
        let (api, users, credentials) = fixture(WardenConfig::default());
        users.insert(UserRecord::new(7, "svc", "unused"));
        credentials.insert(
            ApiCredential::new("key-7", 7)
                .with_secret("shh")
                .with_signature_required(),
        );

        let mut request = keyed_request("key-7");
        request.auth_method = Some(method.to_string());
        request.nonce = Some("n".to_string());
        request.params.insert("a".to_string(), "1".to_string());
        request.signature = Some(api.compute_signature(&request, "shh").unwrap());

        assert!(api.authenticate(&request).is_ok(), "digest {}", method);

        request.signature = Some("0000".to_string());
        assert_eq!(
            api.authenticate(&request).unwrap_err().api_code(),
            Some(ApiErrorCode::A408),
            "digest {}",
            method
        );
    }
}

// ==================== GATES ====================

#[test]
fn test_gate_errors_carry_distinct_codes() {
    let (api, users, credentials) = fixture(WardenConfig::default());
    users.insert(UserRecord::new(7, "svc", "unused"));

    credentials.insert(
        ApiCredential::new("ip-bound", 7).with_allowed_ips(vec!["10.0.0.0/8".to_string()]),
    );
    let mut request = keyed_request("ip-bound");
    request.client_ip = "192.0.2.1".parse().unwrap();
    assert_eq!(
        api.authenticate(&request).unwrap_err().api_code(),
        Some(ApiErrorCode::A406)
    );

    credentials.insert(ApiCredential::new("hdr-bound", 7).with_required_header("X-Tenant", "acme"));
    assert_eq!(
        api.authenticate(&keyed_request("hdr-bound")).unwrap_err().api_code(),
        Some(ApiErrorCode::A407)
    );

    credentials.insert(ApiCredential::new("tls-bound", 7).with_https_only());
    assert_eq!(
        api.authenticate(&keyed_request("tls-bound")).unwrap_err().api_code(),
        Some(ApiErrorCode::A407A)
    );
}

#[test]
fn test_https_gate_requires_port_443() {
    let (api, users, credentials) = fixture(WardenConfig::default());
    users.insert(UserRecord::new(7, "svc", "unused"));
    credentials.insert(ApiCredential::new("tls", 7).with_https_only());

    let mut request = keyed_request("tls");
    request.https = true;
    request.server_port = 8443;
    assert_eq!(
        api.authenticate(&request).unwrap_err(),
        WardenError::ProtocolNotAllowed
    );

    request.server_port = 443;
    assert!(api.authenticate(&request).is_ok());
}

// ==================== PUBLIC METHODS ====================

#[test]
fn test_public_methods_bypass_key_and_signature() {
    let (api, _, _) = fixture(WardenConfig::default());
    api.add_public_method("orders.list");

    let mut request = ApiRequest::default();
    request.component = Some("orders".to_string());
    request.view = Some("list".to_string());
    assert!(api.authenticate(&request).unwrap().is_public());

    // A different view on the same component still needs credentials.
    request.view = Some("cancel".to_string());
    assert!(api.authenticate(&request).is_err());
}

#[test]
fn test_dotted_method_value_matches_public_list() {
    let (api, _, _) = fixture(WardenConfig::default());
    let mut request = ApiRequest::default();
    request.method = Some("members.login".to_string());
    let request = request.normalize();
    assert!(api.authenticate(&request).unwrap().is_public());
}

// ==================== VALIDATION CACHE ====================

#[derive(Clone)]
struct CountingCredentialStore {
    inner: MemoryApiCredentialStore,
    lookups: Arc<AtomicUsize>,
}

impl CountingCredentialStore {
    fn new(inner: MemoryApiCredentialStore) -> Self {
        Self {
            inner,
            lookups: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl ApiCredentialRepository for CountingCredentialStore {
    fn find_by_key(&self, api_key: &str) -> Result<Option<ApiCredential>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_key(api_key)
    }
}

#[test]
fn test_credential_cache_skips_repeated_lookups() {
    let users = MemoryUserStore::new();
    users.insert(UserRecord::new(7, "svc", "unused"));
    let backing = MemoryApiCredentialStore::new();
    backing.insert(ApiCredential::new("key-7", 7));
    let counting = CountingCredentialStore::new(backing);

    let mut config = WardenConfig::default();
    config.api.cache_ttl_secs = Some(600);
    let clock = ManualClock::new(Utc::now());
    let api = ApiAuthenticator::new(
        Arc::new(counting.clone()),
        Arc::new(users.clone()),
        Arc::new(MemorySession::new()),
        config,
    )
    .with_clock(Arc::new(clock.clone()));

    let request = keyed_request("key-7");
    assert!(api.authenticate(&request).is_ok());
    assert!(api.authenticate(&request).is_ok());
    assert!(api.authenticate(&request).is_ok());
    assert_eq!(counting.lookups(), 1);

    // Past the TTL the store is consulted again.
    clock.advance(Duration::seconds(601));
    assert!(api.authenticate(&request).is_ok());
    assert_eq!(counting.lookups(), 2);
}

#[test]
fn test_cache_is_keyed_by_client_ip() {
    let users = MemoryUserStore::new();
    users.insert(UserRecord::new(7, "svc", "unused"));
    let backing = MemoryApiCredentialStore::new();
    backing.insert(ApiCredential::new("key-7", 7));
    let counting = CountingCredentialStore::new(backing);

    let mut config = WardenConfig::default();
    config.api.cache_ttl_secs = Some(600);
    let api = ApiAuthenticator::new(
        Arc::new(counting.clone()),
        Arc::new(users),
        Arc::new(MemorySession::new()),
        config,
    );

    let mut request = keyed_request("key-7");
    assert!(api.authenticate(&request).is_ok());
    request.client_ip = IpAddr::from([10, 1, 1, 1]);
    assert!(api.authenticate(&request).is_ok());
    assert_eq!(counting.lookups(), 2);
}

#[test]
fn test_signature_is_still_checked_while_cached() {
    let users = MemoryUserStore::new();
    users.insert(UserRecord::new(7, "svc", "unused"));
    let credentials = MemoryApiCredentialStore::new();
    credentials.insert(
        ApiCredential::new("key-7", 7)
            .with_secret("shh")
            .with_signature_required(),
    );

    let mut config = WardenConfig::default();
    config.api.cache_ttl_secs = Some(600);
    let api = ApiAuthenticator::new(
        Arc::new(credentials),
        Arc::new(users),
        Arc::new(MemorySession::new()),
        config,
    );

    let mut request = keyed_request("key-7");
    request.nonce = Some("n".to_string());
    request.signature = Some(api.compute_signature(&request, "shh").unwrap());
    assert!(api.authenticate(&request).is_ok());

    // The credential snapshot is cached now, but a tampered signature
    // must still be rejected.
    request.signature = Some("forged".to_string());
    assert_eq!(
        api.authenticate(&request).unwrap_err(),
        WardenError::SignatureInvalid
    );
}
