//! Redis-backed session store.
//!
//! # Responsibilities
//! - Persist session payloads with `SET EX`, fetch with `GET`, drop with `DEL`
//! - Connect with exponential backoff at startup
//! - Retry a command once after a dropped connection
//! - Record round-trip timings for the statistics rollup
//!
//! # Design Decisions
//! - `ConnectionManager` reconnects on the next command after a failure
//! - Expiry is delegated to Redis TTLs, so `gc` has nothing to sweep

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, RedisError};
use tracing::{error, info, warn};

use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::session::store::{SessionError, SessionResult, SessionStore, StoreStatistics};

const KEY_PREFIX: &str = "oauth2_proxy:session:";
const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BASE_DELAY_MS: u64 = 200;
const CONNECT_MAX_DELAY_MS: u64 = 5_000;

/// Session store on top of a Redis connection manager.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    statistics: Arc<StoreStatistics>,
}

impl RedisStore {
    /// Connect to `url`, retrying with exponential backoff.
    pub async fn connect(url: &str) -> SessionResult<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(5))
            .set_response_timeout(Duration::from_secs(5));

        let mut last_error = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match ConnectionManager::new_with_config(client.clone(), manager_config.clone()).await
            {
                Ok(manager) => {
                    if attempt > 1 {
                        info!(attempt, "Redis session store connected after retries");
                    }
                    return Ok(Self {
                        manager,
                        statistics: Arc::new(StoreStatistics::new()),
                    });
                }
                Err(e) => {
                    if attempt < CONNECT_ATTEMPTS {
                        let delay =
                            calculate_backoff(attempt, CONNECT_BASE_DELAY_MS, CONNECT_MAX_DELAY_MS);
                        warn!(
                            attempt,
                            max_attempts = CONNECT_ATTEMPTS,
                            delay = ?delay,
                            error = %e,
                            "Redis connection failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(SessionError::Unavailable(format!(
            "failed to connect to Redis after {CONNECT_ATTEMPTS} attempts: {}",
            last_error.map_or_else(|| "unknown error".to_string(), |e| e.to_string())
        )))
    }

    fn key(id: &str) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    /// Run `op`, retrying once if the connection dropped underneath it.
    async fn run<T, F, Fut>(&self, command: &'static str, op: F) -> SessionResult<T>
    where
        T: Send,
        F: Fn(ConnectionManager) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, RedisError>> + Send,
    {
        let started = Instant::now();
        let result = match op(self.manager.clone()).await {
            Err(e) if is_connection_failure(&e) => {
                warn!(command, error = %e, "Redis connection lost, reconnecting");
                op(self.manager.clone()).await
            }
            other => other,
        };

        let elapsed = started.elapsed();
        self.statistics.record(elapsed);
        metrics::record_store_call(self.name(), command, elapsed);

        result.map_err(|e| {
            error!(command, error = %e, "Redis command failed");
            unavailable(e)
        })
    }
}

fn is_connection_failure(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

fn unavailable(e: RedisError) -> SessionError {
    SessionError::Unavailable(e.to_string())
}

#[async_trait]
impl SessionStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn read(&self, id: &str) -> SessionResult<Option<Vec<u8>>> {
        let key = Self::key(id);
        self.run("GET", |mut conn| {
            let key = key.clone();
            async move { conn.get::<_, Option<Vec<u8>>>(key).await }
        })
        .await
    }

    async fn write(&self, id: &str, data: Vec<u8>, ttl: Duration) -> SessionResult<()> {
        let key = Self::key(id);
        let ttl_secs = ttl.as_secs().max(1);
        self.run("SET", |mut conn| {
            let key = key.clone();
            let data = data.clone();
            async move { conn.set_ex::<_, _, ()>(key, data, ttl_secs).await }
        })
        .await
    }

    async fn destroy(&self, id: &str) -> SessionResult<()> {
        let key = Self::key(id);
        self.run("DEL", |mut conn| {
            let key = key.clone();
            async move { conn.del::<_, ()>(key).await }
        })
        .await
    }

    async fn gc(&self, _max_age: Duration) -> SessionResult<usize> {
        Ok(0)
    }

    async fn ping(&self) -> SessionResult<()> {
        let response: String = self
            .run("PING", |mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;

        if response == "PONG" {
            Ok(())
        } else {
            Err(SessionError::Unavailable(format!(
                "unexpected PING response '{response}'"
            )))
        }
    }

    fn statistics(&self) -> Option<&StoreStatistics> {
        Some(self.statistics.as_ref())
    }
}
