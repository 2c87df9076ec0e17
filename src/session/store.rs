//! Session storage abstraction.
//!
//! # Responsibilities
//! - Define the key-value contract the session layer consumes
//! - Define storage errors
//! - Keep timing statistics for store round trips
//!
//! # Design Decisions
//! - The store sees opaque bytes; serialization belongs to `Session`
//! - A missing key is `Ok(None)`, never an error
//! - Connection failures surface as `SessionError::Unavailable`

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by session storage.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backing store could not be reached.
    #[error("Session store unavailable: {0}")]
    Unavailable(String),

    /// Session attributes could not be encoded.
    #[error("Session serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// External key-value interface backing sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Short backend name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Fetch the raw payload stored for `id`.
    async fn read(&self, id: &str) -> SessionResult<Option<Vec<u8>>>;

    /// Store `data` under `id`, expiring after `ttl`.
    async fn write(&self, id: &str, data: Vec<u8>, ttl: Duration) -> SessionResult<()>;

    /// Remove the payload stored for `id`.
    async fn destroy(&self, id: &str) -> SessionResult<()>;

    /// Remove sessions older than `max_age`. Returns the number removed.
    async fn gc(&self, max_age: Duration) -> SessionResult<usize>;

    /// Check the connection to the backend.
    async fn ping(&self) -> SessionResult<()> {
        Ok(())
    }

    /// Round-trip timing statistics, if the backend keeps them.
    fn statistics(&self) -> Option<&StoreStatistics> {
        None
    }
}

/// Snapshot of store timings over one reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingSnapshot {
    pub best: Duration,
    pub poor: Duration,
    pub avg: Duration,
    pub total: u64,
}

/// Best/poor/average round-trip times, reset on every report.
#[derive(Debug, Default)]
pub struct StoreStatistics {
    inner: Mutex<Window>,
}

#[derive(Debug, Default)]
struct Window {
    best: Option<Duration>,
    poor: Duration,
    sum: Duration,
    total: u64,
}

impl StoreStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one round trip.
    pub fn record(&self, elapsed: Duration) {
        let mut window = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        window.best = Some(window.best.map_or(elapsed, |best| best.min(elapsed)));
        window.poor = window.poor.max(elapsed);
        window.sum += elapsed;
        window.total += 1;
    }

    /// Return the current window and start a new one.
    pub fn take(&self) -> TimingSnapshot {
        let mut window = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let taken = std::mem::take(&mut *window);

        let avg = if taken.total == 0 {
            Duration::ZERO
        } else {
            taken.sum / taken.total as u32
        };

        TimingSnapshot {
            best: taken.best.unwrap_or_default(),
            poor: taken.poor,
            avg,
            total: taken.total,
        }
    }
}
