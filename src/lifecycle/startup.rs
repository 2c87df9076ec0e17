//! Startup: build process-wide services and spawn background tasks.
//!
//! # Data Flow
//! ```text
//! ProxyConfig → Services::build
//!     → session store (memory or redis)
//!     → upstream client, grant client, app token
//! Services + Shutdown → spawn_background_tasks
//!     → client-credentials refresher
//!     → session gc, health check, statistics rollup
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::ProxyConfig;
use crate::http::error::ProxyError;
use crate::http::upstream::UpstreamClient;
use crate::lifecycle::Shutdown;
use crate::oauth::{AppToken, GrantClient, GrantError};
use crate::session::{self, maintenance, SessionError, SessionStore};

/// Errors that prevent the proxy from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Session store: {0}")]
    Session(#[from] SessionError),

    #[error("Token client: {0}")]
    Grant(#[from] GrantError),

    #[error("Upstream client: {0}")]
    Upstream(#[from] ProxyError),
}

/// Everything a request needs, built once and shared.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<ProxyConfig>,
    pub upstream: UpstreamClient,
    pub grants: GrantClient,
    pub app_token: Arc<AppToken>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Services {
    /// Build services, connecting to the configured session store.
    pub async fn build(config: ProxyConfig) -> Result<Self, StartupError> {
        let sessions = session::connect_store(&config.session).await?;
        Self::with_store(config, sessions)
    }

    /// Build services around an existing session store.
    pub fn with_store(
        config: ProxyConfig,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, StartupError> {
        let upstream = UpstreamClient::new(&config)?;
        let grants = GrantClient::new(&config)?;
        let app_token = Arc::new(AppToken::new(grants.clone(), &config.client_credentials));

        Ok(Self {
            config: Arc::new(config),
            upstream,
            grants,
            app_token,
            sessions,
        })
    }
}

/// Spawn every long-running task. Each stops on `shutdown`.
pub fn spawn_background_tasks(services: &Services, shutdown: &Shutdown) {
    let config = &services.config;

    if config.client_credentials.enabled {
        tokio::spawn(services.app_token.clone().run(shutdown.subscribe()));
    }

    tokio::spawn(maintenance::run_gc(
        services.sessions.clone(),
        Duration::from_secs(config.session.gc_interval_secs),
        Duration::from_secs(config.session.lifetime * 60),
        shutdown.subscribe(),
    ));

    tokio::spawn(maintenance::run_health_check(
        services.sessions.clone(),
        maintenance::HEALTH_CHECK_INTERVAL,
        shutdown.subscribe(),
    ));

    tokio::spawn(maintenance::run_statistics(
        services.sessions.clone(),
        Duration::from_secs(config.observability.statistics_interval_secs),
        shutdown.subscribe(),
    ));
}
