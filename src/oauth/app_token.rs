//! Process-wide client-credentials token.
//!
//! # Responsibilities
//! - Hold the current service-level grant for lock-free reads
//! - Refresh it on a timer ahead of expiry
//! - Refresh it on demand when the upstream rejects it
//!
//! # Design Decisions
//! - `ArcSwapOption` so readers always see a complete token
//! - One in-flight exchange at a time; concurrent on-demand callers
//!   piggy-back on the exchange that is already running
//! - A failed exchange leaves the previous token in place

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::config::ClientCredentialsConfig;
use crate::observability::metrics;
use crate::oauth::grant_client::GrantClient;
use crate::oauth::types::{Grant, GrantError};

/// Refresh interval used when the token endpoint declares no expiry.
const UNBOUNDED_REFRESH: Duration = Duration::from_secs(3600);

/// Service-level token shared by every request without a user grant.
pub struct AppToken {
    current: ArcSwapOption<Grant>,
    client: GrantClient,
    refresh_margin: Duration,
    retry_delay: Duration,
    exchange_lock: Mutex<()>,
}

impl AppToken {
    pub fn new(client: GrantClient, config: &ClientCredentialsConfig) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            client,
            refresh_margin: Duration::from_secs(config.refresh_margin_secs),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            exchange_lock: Mutex::new(()),
        }
    }

    /// The current grant, if one has been obtained.
    pub fn current(&self) -> Option<Arc<Grant>> {
        self.current.load_full()
    }

    /// `Authorization` header value for the current grant.
    pub fn authorization(&self) -> Option<String> {
        self.current().map(|grant| grant.authorization())
    }

    /// Install a grant directly.
    pub fn store(&self, grant: Grant) {
        self.current.store(Some(Arc::new(grant)));
    }

    /// Run one client-credentials exchange and install the result.
    pub async fn refresh_now(&self) -> Result<Arc<Grant>, GrantError> {
        let _guard = self.exchange_lock.lock().await;
        self.exchange().await
    }

    /// Replace a token the upstream just rejected.
    ///
    /// If another task already swapped in a different token while this one
    /// waited, that token is returned without a new exchange.
    pub async fn refresh_rejected(&self, rejected: &str) -> Result<Arc<Grant>, GrantError> {
        let _guard = self.exchange_lock.lock().await;

        if let Some(current) = self.current() {
            if current.access_token != rejected {
                return Ok(current);
            }
        }

        self.exchange().await
    }

    async fn exchange(&self) -> Result<Arc<Grant>, GrantError> {
        match self.client.client_credentials().await {
            Ok(grant) => {
                let grant = Arc::new(grant);
                self.current.store(Some(grant.clone()));
                metrics::record_token_refresh("client_credentials", true);
                info!(expires_in = ?grant.expires_in, "Client credentials token refreshed");
                Ok(grant)
            }
            Err(e) => {
                metrics::record_token_refresh("client_credentials", false);
                warn!(error = %e, "Client credentials exchange failed");
                Err(e)
            }
        }
    }

    /// Delay until the next timed refresh of `grant`.
    pub fn refresh_delay(&self, grant: &Grant) -> Duration {
        match grant.expires_in {
            Some(expires_in) => Duration::from_secs(expires_in)
                .saturating_sub(self.refresh_margin)
                .max(Duration::from_secs(1)),
            None => UNBOUNDED_REFRESH,
        }
    }

    /// Keep the token fresh until shutdown.
    ///
    /// Refreshes immediately, then `refresh_margin` before each expiry.
    /// Failed exchanges are retried every `retry_delay`.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let delay = match self.refresh_now().await {
                Ok(grant) => self.refresh_delay(&grant),
                Err(_) => self.retry_delay,
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    info!("Client credentials refresher stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;

    fn token() -> AppToken {
        let config = ProxyConfig::default();
        let client = GrantClient::new(&config).unwrap();
        AppToken::new(client, &config.client_credentials)
    }

    fn grant(access: &str, expires_in: Option<u64>) -> Grant {
        Grant {
            token_type: "Bearer".to_string(),
            access_token: access.to_string(),
            refresh_token: None,
            expires_in,
            extra: Default::default(),
        }
    }

    #[test]
    fn empty_until_stored() {
        let token = token();
        assert!(token.authorization().is_none());

        token.store(grant("app", Some(3600)));
        assert_eq!(token.authorization().as_deref(), Some("Bearer app"));
    }

    #[test]
    fn refresh_delay_subtracts_margin() {
        let token = token();
        assert_eq!(
            token.refresh_delay(&grant("a", Some(3600))),
            Duration::from_secs(3540)
        );
        assert_eq!(
            token.refresh_delay(&grant("a", Some(30))),
            Duration::from_secs(1)
        );
        assert_eq!(token.refresh_delay(&grant("a", None)), UNBOUNDED_REFRESH);
    }

    #[tokio::test]
    async fn rejected_token_already_replaced_skips_exchange() {
        let token = token();
        token.store(grant("newer", Some(3600)));

        let current = token.refresh_rejected("stale").await.unwrap();
        assert_eq!(current.access_token, "newer");
    }
}
