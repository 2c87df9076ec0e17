//! HTTP server setup and dispatch.
//!
//! # Responsibilities
//! - Create the Axum router with a single fallback handler for every path
//! - Wire up middleware (tracing, request ID, timeout, body limit)
//! - Build one `Exchange` per inbound request and run it through the pipeline
//! - Serve until the shutdown signal fires

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, Instrument};

use crate::http::error::ProxyError;
use crate::http::headers::parse_cookies;
use crate::http::middleware::{standard_pipeline, Exchange, Pipeline};
use crate::http::request::ProxyRequest;
use crate::lifecycle::Services;
use crate::observability::metrics;
use crate::session::Session;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub pipeline: Arc<Pipeline>,
}

/// HTTP server for the OAuth2 proxy.
pub struct HttpServer {
    router: Router,
    services: Services,
}

impl HttpServer {
    pub fn new(services: Services) -> Result<Self, ProxyError> {
        let pipeline = Arc::new(standard_pipeline(&services)?);
        info!(stages = ?pipeline.stage_names(), "Proxy pipeline ready");
        let state = AppState {
            services: services.clone(),
            pipeline,
        };

        let router = Self::build_router(&services, state);
        Ok(Self { router, services })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(services: &Services, state: AppState) -> Router {
        let config = &services.config;

        Router::new().fallback(proxy_handler).with_state(state).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.timeouts.request_secs,
                ))),
        )
    }

    /// The router, for driving the proxy without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        info!(
            address = %addr,
            api_url = %self.services.config.api_url,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Run one client request through the pipeline.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response<Body> {
    let start = Instant::now();
    let config = &state.services.config;

    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let (parts, body) = request.into_parts();
    let cookies = parse_cookies(&parts.headers);
    let session = Session::new(
        config.session.name.clone(),
        cookies.get(&config.session.name).map(String::as_str),
        state.services.sessions.clone(),
        Duration::from_secs(config.session.lifetime * 60),
    );

    let proxy_request = ProxyRequest::new(parts, body, session, state.services.upstream.clone());
    let mut exchange = Exchange::new(request_id.clone(), proxy_request);

    let span = tracing::info_span!(
        "exchange",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let response = match state.pipeline.run(&mut exchange).instrument(span).await {
        Ok(response) => response,
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Failed to build response");
            error_response(&e)
        }
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), start);
    info!(
        request_id = %request_id,
        session = %exchange.request.session().id(),
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}

fn error_response(error: &ProxyError) -> Response<Body> {
    let mut response = Response::new(Body::from(error.body()));
    *response.status_mut() = error.status_code();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::session::MemoryStore;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use serde_json::Value;
    use tower::ServiceExt;

    fn server() -> (HttpServer, MemoryStore) {
        let store = MemoryStore::new();
        let config = ProxyConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            ..ProxyConfig::default()
        };
        let services = Services::with_store(config, Arc::new(store.clone())).unwrap();
        (HttpServer::new(services).unwrap(), store)
    }

    #[tokio::test]
    async fn unsafe_request_without_csrf_header_is_rejected() {
        let (server, store) = server();
        let request = Request::builder()
            .method("POST")
            .uri("/users")
            .body(Body::from("{}"))
            .unwrap();

        let response = server.router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(X_REQUEST_ID).is_some());
        let cookies: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert!(cookies.iter().any(|c| c.starts_with("oauth2_proxy_session=")));
        assert!(cookies.iter().any(|c| c.starts_with("XSRF-TOKEN=")));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["type"], "token_mismatch");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn client_request_id_is_propagated() {
        let (server, _) = server();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(X_REQUEST_ID, "req-42")
            .body(Body::empty())
            .unwrap();

        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.headers().get(X_REQUEST_ID).unwrap(), "req-42");
    }
}
