//! Proxy pipeline and its stages.
//!
//! Stages run in this order on the request side and in reverse on the
//! response side:
//! 1. `session`: start and save the session
//! 2. `csrf_token`: enforce the CSRF header on state-changing requests
//! 3. `authorization`: inject credentials, store grants, refresh on 401
//! 4. `proxy_data`: send the request upstream and collect the answer

pub mod authorization;
pub mod csrf;
pub mod pipeline;
pub mod proxy_data;
pub mod session;

use std::sync::Arc;

use crate::http::error::ProxyError;
use crate::lifecycle::startup::Services;

pub use authorization::AuthorizationStage;
pub use csrf::CsrfStage;
pub use pipeline::{Exchange, Pipeline, RequestFlow, ResponseFlow, Stage};
pub use proxy_data::ProxyDataStage;
pub use session::SessionStage;

/// The standard stage list.
pub fn standard_pipeline(services: &Services) -> Result<Pipeline, ProxyError> {
    let config = &services.config;

    Ok(Pipeline::new(vec![
        Arc::new(SessionStage::new(config.session.clone())),
        Arc::new(CsrfStage::new(&config.csrf, config.session.clone())?),
        Arc::new(AuthorizationStage::new(
            config.clone(),
            services.grants.clone(),
            services.app_token.clone(),
        )),
        Arc::new(ProxyDataStage::new(services.upstream.clone())),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::session::MemoryStore;

    #[tokio::test]
    async fn standard_pipeline_runs_stages_in_order() {
        let services =
            Services::with_store(ProxyConfig::default(), Arc::new(MemoryStore::new())).unwrap();
        let pipeline = standard_pipeline(&services).unwrap();

        assert_eq!(
            pipeline.stage_names(),
            vec!["session", "csrf_token", "authorization", "proxy_data"]
        );
    }
}
