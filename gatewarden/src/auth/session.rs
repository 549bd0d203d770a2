//! Session and cookie carriers.
//!
//! The core never talks to the transport layer; it reads and writes the
//! two identity carriers through these traits, and the embedding layer
//! maps them onto its real session and cookie machinery.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Request-scoped key/value session state.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn remove(&self, key: &str);

    fn clear(&self);
}

/// Cookie carrier owned by the embedding HTTP layer.
pub trait CookieStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    fn set(&self, name: &str, value: &str, max_age: Duration);

    /// Remove immediately (the negative-age expiry of the legacy layer).
    fn expire(&self, name: &str);
}

/// In-memory session, for tests and non-HTTP embeddings.
#[derive(Clone, Default)]
pub struct MemorySession {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySession {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }

    fn clear(&self) {
        self.values.write().clear();
    }
}

/// In-memory cookie jar, for tests and non-HTTP embeddings.
#[derive(Clone, Default)]
pub struct MemoryCookies {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryCookies {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieStore for MemoryCookies {
    fn get(&self, name: &str) -> Option<String> {
        self.values.read().get(name).cloned()
    }

    fn set(&self, name: &str, value: &str, _max_age: Duration) {
        self.values
            .write()
            .insert(name.to_string(), value.to_string());
    }

    fn expire(&self, name: &str) {
        self.values.write().remove(name);
    }
}
