//! CSRF token stage.
//!
//! State-changing requests must echo the session token in the CSRF header.
//! Safe requests get the token handed out as a script-readable cookie
//! whenever the client's copy is missing or stale.

use async_trait::async_trait;
use axum::http::{HeaderName, Method};
use tracing::debug;

use crate::config::{CsrfConfig, SessionConfig};
use crate::http::error::ProxyError;
use crate::http::headers::csrf_cookie;
use crate::http::middleware::pipeline::{Exchange, RequestFlow, ResponseFlow, Stage};
use crate::observability::metrics;

pub struct CsrfStage {
    header: HeaderName,
    cookie: String,
    session: SessionConfig,
}

impl CsrfStage {
    pub fn new(csrf: &CsrfConfig, session: SessionConfig) -> Result<Self, ProxyError> {
        let header = HeaderName::from_bytes(csrf.header.to_ascii_lowercase().as_bytes())
            .map_err(|_| ProxyError::Internal(format!("invalid CSRF header name {}", csrf.header)))?;

        Ok(Self {
            header,
            cookie: csrf.cookie.clone(),
            session,
        })
    }
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

#[async_trait]
impl Stage for CsrfStage {
    fn name(&self) -> &'static str {
        "csrf_token"
    }

    async fn on_request(&self, exchange: &mut Exchange) -> Result<RequestFlow, ProxyError> {
        let request = &mut exchange.request;
        let token = request.session_mut().token();
        let provided = request.header_str(&self.header).map(str::to_string);
        let cookie_current = request.cookie(&self.cookie) == Some(token.as_str());
        request.headers_mut().remove(&self.header);

        if is_safe(request.method()) {
            if !cookie_current {
                exchange
                    .response
                    .add_cookie(&csrf_cookie(&self.session, &self.cookie, &token))?;
            }
            return Ok(RequestFlow::Continue);
        }

        if provided.as_deref() == Some(token.as_str()) {
            return Ok(RequestFlow::Continue);
        }

        debug!(
            request_id = %exchange.id,
            method = %exchange.request.method(),
            header_present = provided.is_some(),
            "CSRF token mismatch"
        );
        metrics::record_csrf_rejection();
        exchange
            .response
            .add_cookie(&csrf_cookie(&self.session, &self.cookie, &token))?;
        Ok(RequestFlow::Reject(ProxyError::TokenMismatch))
    }

    async fn on_response(&self, _exchange: &mut Exchange) -> Result<ResponseFlow, ProxyError> {
        Ok(ResponseFlow::Continue)
    }
}
