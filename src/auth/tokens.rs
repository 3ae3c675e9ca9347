//! OAuth token store

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::config::{keys, KeyValueStore};
use crate::error::Result;
use crate::events::{EventBus, SystemEvent};

/// Persisted marker for an explicitly invalidated token
const FAILED_MARKER: &str = "undefined";

/// One token slot
///
/// `Empty` means never attempted, `Failed` means the last exchange or
/// refresh was rejected and the previous value was discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum TokenValue {
    #[default]
    Empty,
    Valid(String),
    Failed,
}

impl TokenValue {
    pub fn valid(&self) -> Option<&str> {
        match self {
            TokenValue::Valid(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, TokenValue::Valid(_))
    }

    fn from_persisted(text: Option<String>) -> Self {
        match text.as_deref() {
            None | Some("") => TokenValue::Empty,
            Some(FAILED_MARKER) => TokenValue::Failed,
            Some(v) => TokenValue::Valid(v.to_string()),
        }
    }

    fn to_persisted(&self) -> &str {
        match self {
            TokenValue::Empty => "",
            TokenValue::Valid(v) => v,
            TokenValue::Failed => FAILED_MARKER,
        }
    }
}

/// Code, access and refresh tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenSet {
    pub oauth_code: TokenValue,
    pub access_token: TokenValue,
    pub refresh_token: TokenValue,
}

#[derive(Default)]
struct TokenState {
    tokens: TokenSet,
    signed_in: bool,
}

/// Token store shared by the auth flow and every API client
pub struct TokenStore {
    state: RwLock<TokenState>,
    store: Arc<dyn KeyValueStore>,
    events: Arc<EventBus>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>, events: Arc<EventBus>) -> Self {
        Self {
            state: RwLock::new(TokenState::default()),
            store,
            events,
        }
    }

    /// Load persisted tokens and the sign-in flag
    pub async fn restore(&self) -> Result<()> {
        let oauth_code = TokenValue::from_persisted(self.store.load(keys::OAUTH_CODE).await?);
        let access_token = TokenValue::from_persisted(self.store.load(keys::ACCESS_TOKEN).await?);
        let refresh_token =
            TokenValue::from_persisted(self.store.load(keys::REFRESH_TOKEN).await?);
        let signed_in = self.store.load(keys::IS_SIGNED_IN).await?.as_deref() == Some("true");

        let mut state = self.state.write();
        state.tokens = TokenSet {
            oauth_code,
            access_token,
            refresh_token,
        };
        state.signed_in = signed_in;
        Ok(())
    }

    pub fn snapshot(&self) -> TokenSet {
        self.state.read().tokens.clone()
    }

    pub fn signed_in(&self) -> bool {
        self.state.read().signed_in
    }

    /// Current access token if one is valid
    pub fn access_token(&self) -> Option<String> {
        self.state.read().tokens.access_token.valid().map(str::to_string)
    }

    pub fn oauth_code(&self) -> Option<String> {
        self.state.read().tokens.oauth_code.valid().map(str::to_string)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state.read().tokens.refresh_token.valid().map(str::to_string)
    }

    pub async fn set_oauth_code(&self, code: &str) {
        let value = if code.is_empty() {
            TokenValue::Empty
        } else {
            TokenValue::Valid(code.to_string())
        };
        self.state.write().tokens.oauth_code = value.clone();
        self.persist(keys::OAUTH_CODE, value.to_persisted()).await;
    }

    /// Store the result of a successful code exchange and sign in
    pub async fn complete_exchange(&self, access_token: &str, refresh_token: &str) {
        let access = TokenValue::Valid(access_token.to_string());
        let refresh = TokenValue::Valid(refresh_token.to_string());
        {
            let mut state = self.state.write();
            state.tokens.access_token = access.clone();
            state.tokens.refresh_token = refresh.clone();
        }
        self.persist(keys::ACCESS_TOKEN, access.to_persisted()).await;
        self.persist(keys::REFRESH_TOKEN, refresh.to_persisted()).await;
        self.set_signed_in(true).await;
    }

    /// Replace only the access token (refresh success)
    pub async fn set_access_token(&self, access_token: &str) {
        let access = TokenValue::Valid(access_token.to_string());
        self.state.write().tokens.access_token = access.clone();
        self.persist(keys::ACCESS_TOKEN, access.to_persisted()).await;
    }

    /// Mark access and refresh tokens as failed
    pub async fn invalidate(&self) {
        {
            let mut state = self.state.write();
            state.tokens.access_token = TokenValue::Failed;
            state.tokens.refresh_token = TokenValue::Failed;
        }
        self.persist(keys::ACCESS_TOKEN, FAILED_MARKER).await;
        self.persist(keys::REFRESH_TOKEN, FAILED_MARKER).await;
    }

    pub async fn set_signed_in(&self, signed_in: bool) {
        let changed = {
            let mut state = self.state.write();
            let changed = state.signed_in != signed_in;
            state.signed_in = signed_in;
            changed
        };
        self.persist(keys::IS_SIGNED_IN, if signed_in { "true" } else { "false" })
            .await;
        if changed {
            self.events
                .publish(SystemEvent::AuthStateChanged { signed_in });
        }
    }

    /// Forget every token and sign out
    pub async fn clear(&self) {
        self.state.write().tokens = TokenSet::default();
        self.persist(keys::OAUTH_CODE, "").await;
        self.persist(keys::ACCESS_TOKEN, "").await;
        self.persist(keys::REFRESH_TOKEN, "").await;
        self.set_signed_in(false).await;
    }

    async fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.store.save(key, value).await {
            warn!("Failed to persist {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;

    fn token_store() -> (TokenStore, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        (TokenStore::new(kv.clone(), Arc::new(EventBus::new())), kv)
    }

    #[tokio::test]
    async fn test_exchange_then_invalidate() {
        let (tokens, kv) = token_store();
        assert_eq!(tokens.snapshot(), TokenSet::default());

        tokens.complete_exchange("T1", "R1").await;
        assert!(tokens.signed_in());
        assert_eq!(tokens.access_token().as_deref(), Some("T1"));

        tokens.invalidate().await;
        let set = tokens.snapshot();
        assert_eq!(set.access_token, TokenValue::Failed);
        assert_eq!(set.refresh_token, TokenValue::Failed);
        assert_eq!(tokens.access_token(), None);
        assert_eq!(kv.get(keys::ACCESS_TOKEN).as_deref(), Some(FAILED_MARKER));
    }

    #[tokio::test]
    async fn test_restore_distinguishes_failed_from_empty() {
        let (tokens, kv) = token_store();
        kv.save(keys::OAUTH_CODE, "ABC").await.unwrap();
        kv.save(keys::ACCESS_TOKEN, FAILED_MARKER).await.unwrap();
        kv.save(keys::IS_SIGNED_IN, "true").await.unwrap();

        tokens.restore().await.unwrap();
        let set = tokens.snapshot();
        assert_eq!(set.oauth_code, TokenValue::Valid("ABC".to_string()));
        assert_eq!(set.access_token, TokenValue::Failed);
        assert_eq!(set.refresh_token, TokenValue::Empty);
        assert!(tokens.signed_in());
    }

    #[tokio::test]
    async fn test_clear_signs_out() {
        let (tokens, kv) = token_store();
        tokens.set_oauth_code("ABC").await;
        tokens.complete_exchange("T1", "R1").await;

        tokens.clear().await;
        assert!(!tokens.signed_in());
        assert_eq!(tokens.snapshot(), TokenSet::default());
        assert_eq!(kv.get(keys::IS_SIGNED_IN).as_deref(), Some("false"));
    }
}
