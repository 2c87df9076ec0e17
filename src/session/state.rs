//! Per-request session state.
//!
//! # Responsibilities
//! - Load attributes once per request and save them once
//! - Own the CSRF token and the OAuth grant
//! - Address nested attributes with dotted keys (`oauth_grant.access_token`)
//!
//! # Design Decisions
//! - Loading fails soft: missing or unparsable payloads start an empty session
//! - Only a store connection failure is an error
//! - Attributes are a JSON object so the stored grant keeps every field

use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::oauth::Grant;
use crate::session::store::{SessionResult, SessionStore};

/// Attribute holding the CSRF token.
pub const TOKEN_KEY: &str = "_token";

/// Attribute holding the OAuth grant record.
pub const GRANT_KEY: &str = "oauth_grant";

const ID_LENGTH: usize = 40;

/// Random alphanumeric string used for session IDs and CSRF tokens.
pub fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect()
}

/// True if `id` looks like an ID this proxy issued.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LENGTH && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Authentication and CSRF state for one client.
pub struct Session {
    id: String,
    name: String,
    attributes: Map<String, Value>,
    store: Arc<dyn SessionStore>,
    lifetime: Duration,
    started: bool,
    saved: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("started", &self.started)
            .field("saved", &self.saved)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Bind a session to `id` from the client cookie, or to a fresh ID.
    pub fn new(
        name: impl Into<String>,
        id: Option<&str>,
        store: Arc<dyn SessionStore>,
        lifetime: Duration,
    ) -> Self {
        let id = match id {
            Some(id) if is_valid_id(id) => id.to_string(),
            _ => random_token(),
        };

        Self {
            id,
            name: name.into(),
            attributes: Map::new(),
            store,
            lifetime,
            started: false,
            saved: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Load stored attributes and make sure a CSRF token exists.
    pub async fn start(&mut self) -> SessionResult<()> {
        if self.started {
            return Ok(());
        }

        self.load().await?;
        if !self.has(TOKEN_KEY) {
            self.regenerate_token();
        }
        self.started = true;
        Ok(())
    }

    /// Replace attributes with what the store holds for this ID.
    ///
    /// Returns `true` if stored state was found.
    pub async fn load(&mut self) -> SessionResult<bool> {
        let Some(raw) = self.store.read(&self.id).await? else {
            return Ok(false);
        };

        match serde_json::from_slice::<Map<String, Value>>(&raw) {
            Ok(attributes) => {
                self.attributes = attributes;
                Ok(true)
            }
            Err(e) => {
                warn!(session = %self.id, error = %e, "Discarding unreadable session payload");
                Ok(false)
            }
        }
    }

    /// The CSRF token, generated on first use.
    pub fn token(&mut self) -> String {
        match self.attributes.get(TOKEN_KEY).and_then(Value::as_str) {
            Some(token) => token.to_string(),
            None => self.regenerate_token(),
        }
    }

    /// Replace the CSRF token.
    pub fn regenerate_token(&mut self) -> String {
        let token = random_token();
        self.attributes
            .insert(TOKEN_KEY.to_string(), Value::from(token.clone()));
        token
    }

    /// Attribute at the dotted path `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let mut current = self.attributes.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Attribute at `key`, or `default` when absent.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).cloned().unwrap_or(default)
    }

    /// String attribute at `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|value| !value.is_null())
    }

    /// Set the attribute at the dotted path `key`, creating parents as needed.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let mut parts: Vec<&str> = key.split('.').collect();
        let Some(last) = parts.pop() else {
            return;
        };

        let mut current = &mut self.attributes;
        for part in parts {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry.as_object_mut() {
                Some(map) => map,
                None => return,
            };
        }
        current.insert(last.to_string(), value.into());
    }

    /// Remove the attribute at the dotted path `key`.
    pub fn forget(&mut self, key: &str) -> Option<Value> {
        let mut parts: Vec<&str> = key.split('.').collect();
        let last = parts.pop()?;

        let mut current = &mut self.attributes;
        for part in parts {
            current = current.get_mut(part)?.as_object_mut()?;
        }
        current.remove(last)
    }

    /// The stored grant, if any.
    pub fn grant(&self) -> Option<Grant> {
        let value = self.get(GRANT_KEY)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Store `grant` verbatim.
    pub fn put_grant(&mut self, grant: &Grant) -> SessionResult<()> {
        let value = serde_json::to_value(grant)?;
        self.attributes.insert(GRANT_KEY.to_string(), value);
        Ok(())
    }

    /// Store a raw grant object as returned by the token endpoint.
    pub fn put_grant_value(&mut self, grant: Value) {
        self.attributes.insert(GRANT_KEY.to_string(), grant);
    }

    pub fn forget_grant(&mut self) -> Option<Value> {
        self.attributes.remove(GRANT_KEY)
    }

    /// Persist attributes with the session lifetime as TTL.
    ///
    /// Only the first call per request writes; later calls are no-ops.
    pub async fn save(&mut self) -> SessionResult<()> {
        if self.saved {
            return Ok(());
        }

        let payload = serde_json::to_vec(&self.attributes)?;
        self.store.write(&self.id, payload, self.lifetime).await?;
        self.saved = true;
        debug!(session = %self.id, "Session saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::memory::MemoryStore;
    use crate::session::store::SessionError;
    use async_trait::async_trait;
    use serde_json::json;

    fn session(store: Arc<dyn SessionStore>, id: Option<&str>) -> Session {
        Session::new("test_session", id, store, Duration::from_secs(60))
    }

    struct DownStore;

    #[async_trait]
    impl SessionStore for DownStore {
        fn name(&self) -> &'static str {
            "down"
        }
        async fn read(&self, _id: &str) -> SessionResult<Option<Vec<u8>>> {
            Err(SessionError::Unavailable("connection refused".into()))
        }
        async fn write(&self, _id: &str, _data: Vec<u8>, _ttl: Duration) -> SessionResult<()> {
            Err(SessionError::Unavailable("connection refused".into()))
        }
        async fn destroy(&self, _id: &str) -> SessionResult<()> {
            Ok(())
        }
        async fn gc(&self, _max_age: Duration) -> SessionResult<usize> {
            Ok(0)
        }
    }

    #[test]
    fn invalid_cookie_id_is_replaced() {
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let s = session(store.clone(), Some("../../etc/passwd"));
        assert!(is_valid_id(s.id()));
        assert_ne!(s.id(), "../../etc/passwd");

        let valid = random_token();
        let s = session(store, Some(&valid));
        assert_eq!(s.id(), valid);
    }

    #[tokio::test]
    async fn start_generates_stable_token() {
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let mut s = session(store, None);
        s.start().await.unwrap();

        let first = s.token();
        assert_eq!(first.len(), 40);
        assert_eq!(s.token(), first);
    }

    #[tokio::test]
    async fn save_then_load_round_trips_under_same_id() {
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let mut s = session(store.clone(), None);
        s.start().await.unwrap();
        let token = s.token();
        s.set("oauth_grant.access_token", "abc");
        s.save().await.unwrap();

        let mut reloaded = session(store, Some(s.id()));
        assert!(reloaded.load().await.unwrap());
        assert_eq!(reloaded.token(), token);
        assert_eq!(reloaded.get_str("oauth_grant.access_token"), Some("abc"));
    }

    #[tokio::test]
    async fn save_writes_once() {
        let store = Arc::new(MemoryStore::new());
        let mut s = session(store.clone(), None);
        s.start().await.unwrap();
        s.save().await.unwrap();
        store.destroy(s.id()).await.unwrap();

        s.save().await.unwrap();
        assert!(s.is_saved());
        assert_eq!(store.read(s.id()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unparsable_payload_loads_empty() {
        let store = Arc::new(MemoryStore::new());
        let id = random_token();
        store
            .write(&id, b"not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let mut s = session(store, Some(&id));
        assert!(!s.load().await.unwrap());
        s.start().await.unwrap();
        assert!(s.has(TOKEN_KEY));
    }

    #[tokio::test]
    async fn store_outage_is_an_error() {
        let mut s = session(Arc::new(DownStore), None);
        assert!(matches!(s.start().await, Err(SessionError::Unavailable(_))));
    }

    #[test]
    fn dotted_paths_address_grant_fields() {
        let mut s = session(Arc::new(MemoryStore::new()), None);
        s.put_grant_value(json!({"access_token": "a", "refresh_token": "r"}));

        assert!(s.has("oauth_grant.refresh_token"));
        assert_eq!(s.get_or("oauth_grant.missing", json!("d")), json!("d"));

        assert_eq!(s.forget("oauth_grant.refresh_token"), Some(json!("r")));
        assert!(!s.has("oauth_grant.refresh_token"));
        assert!(s.has("oauth_grant.access_token"));

        s.forget_grant();
        assert!(!s.has(GRANT_KEY));
    }

    #[test]
    fn grant_round_trips_through_attributes() {
        let mut s = session(Arc::new(MemoryStore::new()), None);
        assert!(s.grant().is_none());

        let grant = Grant::from_slice(
            br#"{"token_type":"Bearer","access_token":"a","refresh_token":"r","expires_in":60}"#,
        )
        .unwrap();
        s.put_grant(&grant).unwrap();

        assert_eq!(s.grant(), Some(grant));
        assert_eq!(s.get_str("oauth_grant.token_type"), Some("Bearer"));
    }
}
