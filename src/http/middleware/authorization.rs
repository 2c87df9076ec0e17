//! Authorization stage.
//!
//! # Responsibilities
//! - Grant path: merge client credentials into the JSON body; turn a
//!   successful upstream answer into a 204 and keep the grant in the session
//! - Other paths: attach the user grant, or the app token without one
//! - Revoke path: pass the access token as `token`; forget the grant on success
//! - Upstream 401: refresh once and ask the pipeline for a single retry
//!
//! # Design Decisions
//! - Refresh failures never escape this stage; the original 401 is forwarded
//! - The stored grant is the raw token endpoint object, not a re-serialization

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header::{self, HeaderValue};
use axum::http::StatusCode;
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::ProxyConfig;
use crate::http::error::ProxyError;
use crate::http::middleware::pipeline::{Exchange, RequestFlow, ResponseFlow, Stage};
use crate::oauth::{AppToken, Grant, GrantClient};
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Target {
    #[default]
    Resource,
    Grant,
    Revoke,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum Credential {
    #[default]
    None,
    User,
    /// App token, with the access token that was sent.
    App(String),
}

/// Per-exchange state carried from `on_request` to `on_response`.
#[derive(Debug, Clone, Default)]
struct AuthorizationState {
    target: Target,
    credential: Credential,
    refreshed: bool,
}

pub struct AuthorizationStage {
    config: Arc<ProxyConfig>,
    grants: GrantClient,
    app_token: Arc<AppToken>,
}

impl AuthorizationStage {
    pub fn new(config: Arc<ProxyConfig>, grants: GrantClient, app_token: Arc<AppToken>) -> Self {
        Self {
            config,
            grants,
            app_token,
        }
    }

    /// Merge `grant_type`, `client_id` and `client_secret` into the client body.
    fn merge_grant_body(&self, body: &[u8]) -> Result<Bytes, ProxyError> {
        let mut fields = if body.iter().all(u8::is_ascii_whitespace) {
            Map::new()
        } else {
            match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(map)) => map,
                _ => return Err(ProxyError::InvalidGrantBody),
            }
        };

        fields.insert("grant_type".into(), Value::from(self.config.grant_type.as_str()));
        fields.insert("client_id".into(), Value::from(self.config.client_id.as_str()));
        fields.insert(
            "client_secret".into(),
            Value::from(self.config.client_secret.as_str()),
        );

        serde_json::to_vec(&fields)
            .map(Bytes::from)
            .map_err(|e| ProxyError::Internal(format!("failed to encode grant body: {e}")))
    }

    async fn prepare(
        &self,
        exchange: &mut Exchange,
        state: &mut AuthorizationState,
    ) -> Result<RequestFlow, ProxyError> {
        let path = exchange.request.uri_path().to_string();

        if path == self.config.grant_path {
            state.target = Target::Grant;
            let body = exchange.request.read_to_end().await?;
            let merged = match self.merge_grant_body(&body) {
                Ok(merged) => merged,
                Err(e) => return Ok(RequestFlow::Reject(e)),
            };
            exchange.request.replace_body(merged)?;
            exchange
                .request
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            return Ok(RequestFlow::Continue);
        }

        let user_grant = exchange.request.session().grant();
        if let Some(grant) = &user_grant {
            exchange.request.set_authorization(&grant.authorization())?;
            state.credential = Credential::User;
        } else if let Some(app) = self.app_token.current() {
            exchange.request.set_authorization(&app.authorization())?;
            state.credential = Credential::App(app.access_token.clone());
        }

        if path == self.config.revoke_path {
            state.target = Target::Revoke;
            if let Some(grant) = user_grant {
                exchange.request.set_query("token", grant.access_token);
            }
        }

        Ok(RequestFlow::Continue)
    }

    async fn complete(
        &self,
        exchange: &mut Exchange,
        state: &mut AuthorizationState,
    ) -> Result<ResponseFlow, ProxyError> {
        let Some(status) = exchange.response.upstream_status() else {
            return Ok(ResponseFlow::Continue);
        };

        match state.target {
            Target::Grant if status == StatusCode::OK => {
                self.store_grant(exchange)?;
                return Ok(ResponseFlow::Continue);
            }
            Target::Grant => return Ok(ResponseFlow::Continue),
            Target::Revoke if status.is_success() => {
                exchange.request.session_mut().forget_grant();
                return Ok(ResponseFlow::Continue);
            }
            _ => {}
        }

        if status != StatusCode::UNAUTHORIZED || state.refreshed {
            return Ok(ResponseFlow::Continue);
        }

        match state.credential.clone() {
            Credential::User => self.refresh_user_grant(exchange, state).await,
            Credential::App(rejected) => {
                state.refreshed = true;
                match self.app_token.refresh_rejected(&rejected).await {
                    Ok(grant) => {
                        exchange.request.set_authorization(&grant.authorization())?;
                        state.credential = Credential::App(grant.access_token.clone());
                        Ok(ResponseFlow::Retry)
                    }
                    Err(_) => Ok(ResponseFlow::Continue),
                }
            }
            Credential::None => Ok(ResponseFlow::Continue),
        }
    }

    /// Persist the grant from a 200 grant response and hide it from the client.
    fn store_grant(&self, exchange: &mut Exchange) -> Result<(), ProxyError> {
        let body = exchange.response.body();
        Grant::from_slice(body).map_err(|e| ProxyError::MalformedGrant(e.to_string()))?;
        let raw: Value = serde_json::from_slice(body)
            .map_err(|e| ProxyError::MalformedGrant(e.to_string()))?;

        exchange.request.session_mut().put_grant_value(raw);
        exchange.response.discard_body();
        exchange.response.set_status(StatusCode::NO_CONTENT);
        info!(request_id = %exchange.id, session = %exchange.request.session().id(), "Grant stored");
        Ok(())
    }

    async fn refresh_user_grant(
        &self,
        exchange: &mut Exchange,
        state: &mut AuthorizationState,
    ) -> Result<ResponseFlow, ProxyError> {
        let Some(current) = exchange.request.session().grant() else {
            return Ok(ResponseFlow::Continue);
        };
        let Some(refresh_token) = current.refresh_token.clone() else {
            return Ok(ResponseFlow::Continue);
        };

        state.refreshed = true;
        match self.grants.refresh(&refresh_token).await {
            Ok(fresh) => {
                let fresh = fresh.inherit_refresh_token(&current);
                exchange.request.session_mut().put_grant(&fresh)?;
                exchange.request.set_authorization(&fresh.authorization())?;
                metrics::record_token_refresh("refresh_token", true);
                info!(request_id = %exchange.id, "Access token refreshed, retrying");
                Ok(ResponseFlow::Retry)
            }
            Err(e) => {
                metrics::record_token_refresh("refresh_token", false);
                warn!(request_id = %exchange.id, error = %e, "Refresh failed, forgetting grant");
                exchange.request.session_mut().forget_grant();
                Ok(ResponseFlow::Continue)
            }
        }
    }
}

#[async_trait]
impl Stage for AuthorizationStage {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn on_request(&self, exchange: &mut Exchange) -> Result<RequestFlow, ProxyError> {
        let mut state = AuthorizationState::default();
        let result = self.prepare(exchange, &mut state).await;
        exchange.extensions.insert(state);
        result
    }

    async fn on_response(&self, exchange: &mut Exchange) -> Result<ResponseFlow, ProxyError> {
        let mut state = exchange
            .extensions
            .remove::<AuthorizationState>()
            .unwrap_or_default();
        let result = self.complete(exchange, &mut state).await;
        exchange.extensions.insert(state);
        result
    }
}
