//! Key-value persistence for session state

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::Result;

/// Fixed persistence keys
pub mod keys {
    pub const OAUTH_CODE: &str = "oauthCode";
    pub const ACCESS_TOKEN: &str = "accessToken";
    pub const REFRESH_TOKEN: &str = "refreshToken";
    pub const IS_SIGNED_IN: &str = "isSignedIn";
    pub const IS_SUBSCRIBED: &str = "isSubscribed";
    pub const LOGS: &str = "logs";
    pub const LOG_FILTER: &str = "logFilter";
}

/// String key-value persistence
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Load a value, `None` if the key was never written
    async fn load(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a value
    async fn save(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Volatile store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value without going through the async trait
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}
