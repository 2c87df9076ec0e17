//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! session cookie → Session::new (ID validated or regenerated)
//!     → Session::start (store read, CSRF token ensured)
//!     → stages read/write attributes
//!     → Session::save (store write, TTL = lifetime)
//! ```
//!
//! # Design Decisions
//! - One `SessionStore` per process, shared as `Arc<dyn SessionStore>`
//! - Memory store for single instances, Redis for shared deployments

pub mod maintenance;
pub mod memory;
pub mod redis;
pub mod state;
pub mod store;

use std::sync::Arc;

use crate::config::{SessionConfig, SessionDriver};

pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use state::Session;
pub use store::{SessionError, SessionResult, SessionStore};

/// Build the store selected by `config.driver`.
pub async fn connect_store(config: &SessionConfig) -> SessionResult<Arc<dyn SessionStore>> {
    match config.driver {
        SessionDriver::Memory => Ok(Arc::new(MemoryStore::new())),
        SessionDriver::Redis => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                SessionError::Unavailable("redis driver selected without redis_url".to_string())
            })?;
            Ok(Arc::new(RedisStore::connect(url).await?))
        }
    }
}
