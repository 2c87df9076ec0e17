//! In-process session store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::session::store::{SessionResult, SessionStore};

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    written_at: Instant,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// A concurrent map of session ID → payload with per-entry TTL.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read(&self, id: &str) -> SessionResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let expired = match self.inner.get(id) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.data.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.inner.remove(id);
        }
        Ok(None)
    }

    async fn write(&self, id: &str, data: Vec<u8>, ttl: Duration) -> SessionResult<()> {
        let now = Instant::now();
        self.inner.insert(
            id.to_string(),
            Entry {
                data,
                written_at: now,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn destroy(&self, id: &str) -> SessionResult<()> {
        self.inner.remove(id);
        Ok(())
    }

    async fn gc(&self, max_age: Duration) -> SessionResult<usize> {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, entry| {
            !entry.is_expired(now) && now.duration_since(entry.written_at) <= max_age
        });
        Ok(before.saturating_sub(self.inner.len()))
    }
}
