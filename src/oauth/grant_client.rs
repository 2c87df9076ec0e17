//! Side-channel exchanges against the upstream token endpoint.
//!
//! # Responsibilities
//! - Exchange a refresh token for a new grant
//! - Obtain the service-level client-credentials grant
//!
//! # Design Decisions
//! - Client credentials are always injected here; callers never see them
//! - Exchanges are plain JSON POSTs, bounded by the upstream timeout

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::config::ProxyConfig;
use crate::oauth::types::{Grant, GrantError};

/// HTTP client for grant exchanges initiated by the proxy itself.
#[derive(Clone)]
pub struct GrantClient {
    http: reqwest::Client,
    grant_url: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
}

impl GrantClient {
    pub fn new(config: &ProxyConfig) -> Result<Self, GrantError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.upstream_secs))
            .build()?;

        Ok(Self {
            http,
            grant_url: config.grant_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.client_credentials.scope.clone(),
        })
    }

    /// Exchange `refresh_token` for a new grant.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Grant, GrantError> {
        self.exchange(json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": self.client_id,
            "client_secret": self.client_secret,
        }))
        .await
    }

    /// Obtain a grant for the proxy itself.
    pub async fn client_credentials(&self) -> Result<Grant, GrantError> {
        let mut body = json!({
            "grant_type": "client_credentials",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
        });
        if let (Some(scope), Some(map)) = (&self.scope, body.as_object_mut()) {
            map.insert("scope".to_string(), Value::from(scope.as_str()));
        }

        self.exchange(body).await
    }

    async fn exchange(&self, body: Value) -> Result<Grant, GrantError> {
        debug!(
            url = %self.grant_url,
            grant_type = %body["grant_type"],
            "Exchanging grant"
        );

        let response = self.http.post(&self.grant_url).json(&body).send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(GrantError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Grant::from_slice(&bytes)
    }
}
