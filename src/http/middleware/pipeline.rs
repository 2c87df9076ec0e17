//! Ordered stage runner.
//!
//! # Data Flow
//! ```text
//! on_request:  Session → CsrfToken → Authorization → ProxyData
//!                                                      │ upstream
//! on_response: Session ← CsrfToken ← Authorization ← ProxyData
//! ```
//!
//! # Design Decisions
//! - A rejection or error renders the JSON error into the response, then
//!   unwinds the `on_response` hooks of every stage already entered, so the
//!   session is still saved
//! - `Retry` re-dispatches the request and restarts the response side from
//!   the innermost stage; it is honoured once per exchange
//! - Stage-private state travels in `Exchange::extensions`

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Extensions, Response};
use tracing::{debug, error, warn};

use crate::http::error::ProxyError;
use crate::http::request::ProxyRequest;
use crate::http::response::ProxyResponse;

/// One client request/response pair moving through the pipeline.
pub struct Exchange {
    /// Request ID (`x-request-id`).
    pub id: String,
    pub request: ProxyRequest,
    pub response: ProxyResponse,
    /// Per-exchange state private to individual stages.
    pub extensions: Extensions,
}

impl Exchange {
    pub fn new(id: impl Into<String>, request: ProxyRequest) -> Self {
        Self {
            id: id.into(),
            request,
            response: ProxyResponse::new(),
            extensions: Extensions::new(),
        }
    }
}

/// Outcome of a request hook.
#[derive(Debug)]
pub enum RequestFlow {
    Continue,
    Reject(ProxyError),
}

/// Outcome of a response hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFlow {
    Continue,
    /// Send the request upstream again and rerun the response side.
    Retry,
}

/// One pipeline link.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_request(&self, exchange: &mut Exchange) -> Result<RequestFlow, ProxyError>;

    async fn on_response(&self, exchange: &mut Exchange) -> Result<ResponseFlow, ProxyError>;
}

/// Fixed, ordered list of stages.
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Drive `exchange` through every stage and build the client response.
    pub async fn run(&self, exchange: &mut Exchange) -> Result<Response<Body>, ProxyError> {
        let mut entered = 0;
        let mut rejected = false;

        for stage in &self.stages {
            entered += 1;
            match stage.on_request(exchange).await {
                Ok(RequestFlow::Continue) => {}
                Ok(RequestFlow::Reject(e)) => {
                    debug!(request_id = %exchange.id, stage = stage.name(), reason = %e, "Request rejected");
                    exchange.response.render_error(&e);
                    rejected = true;
                    break;
                }
                Err(e) => {
                    error!(request_id = %exchange.id, stage = stage.name(), error = %e, "Request stage failed");
                    exchange.response.render_error(&e);
                    rejected = true;
                    break;
                }
            }
        }

        let entered_stages = &self.stages[..entered];
        let mut retried = false;

        'response: loop {
            for stage in entered_stages.iter().rev() {
                match stage.on_response(exchange).await {
                    Ok(ResponseFlow::Continue) => {}
                    Ok(ResponseFlow::Retry) if !retried && !rejected => {
                        retried = true;
                        exchange.response.reset_upstream();
                        match exchange.request.retry() {
                            Ok(()) => {
                                debug!(request_id = %exchange.id, stage = stage.name(), "Retrying upstream request");
                                continue 'response;
                            }
                            Err(e) => {
                                error!(request_id = %exchange.id, stage = stage.name(), error = %e, "Retry failed");
                                exchange.response.render_error(&e);
                            }
                        }
                    }
                    Ok(ResponseFlow::Retry) => {
                        warn!(request_id = %exchange.id, stage = stage.name(), "Ignoring second retry");
                    }
                    Err(e) => {
                        error!(request_id = %exchange.id, stage = stage.name(), error = %e, "Response stage failed");
                        exchange.response.render_error(&e);
                    }
                }
            }
            break;
        }

        exchange.response.dispatch()
    }
}
