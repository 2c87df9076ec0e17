//! Session stage: start the session on the way in, save it on the way out.

use async_trait::async_trait;
use tracing::debug;

use crate::config::SessionConfig;
use crate::http::error::ProxyError;
use crate::http::headers::session_cookie;
use crate::http::middleware::pipeline::{Exchange, RequestFlow, ResponseFlow, Stage};

pub struct SessionStage {
    config: SessionConfig,
}

impl SessionStage {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Stage for SessionStage {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn on_request(&self, exchange: &mut Exchange) -> Result<RequestFlow, ProxyError> {
        let session = exchange.request.session_mut();
        session.start().await?;
        debug!(request_id = %exchange.id, session = %session.id(), "Session started");

        let cookie = session_cookie(&self.config, session.id());
        exchange.response.add_cookie(&cookie)?;
        Ok(RequestFlow::Continue)
    }

    async fn on_response(&self, exchange: &mut Exchange) -> Result<ResponseFlow, ProxyError> {
        let session = exchange.request.session_mut();
        if session.is_started() {
            session.save().await?;
        }
        Ok(ResponseFlow::Continue)
    }
}
