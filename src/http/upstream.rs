//! Connection to the protected API.
//!
//! # Responsibilities
//! - Resolve proxied paths against `api_url`
//! - Send requests over the shared connection pool
//! - Bound each round trip by `timeouts.upstream_secs`
//!
//! # Design Decisions
//! - Each call runs as its own task so the request body can be streamed
//!   while the pipeline keeps reading from the client
//! - Dropping an `UpstreamCall` aborts the task, which tears down the
//!   upstream connection when the client goes away

use std::time::Duration;

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{Request, Response, Uri};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio::task::JoinHandle;

use crate::config::ProxyConfig;
use crate::http::error::ProxyError;

/// Pooled HTTP client used for every proxied call.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpConnector, Body>,
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let base: Uri = config
            .api_url
            .parse()
            .map_err(|e| ProxyError::Internal(format!("invalid api_url: {e}")))?;

        let authority = base
            .authority()
            .cloned()
            .ok_or_else(|| ProxyError::Internal("api_url has no host".to_string()))?;

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            client,
            scheme: base.scheme().cloned().unwrap_or(Scheme::HTTP),
            authority,
            base_path: base.path().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeouts.upstream_secs),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Absolute upstream URI for a client `path_and_query`.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, ProxyError> {
        let joined = format!("{}{}", self.base_path, path_and_query);
        let path_and_query: PathAndQuery = joined
            .parse()
            .map_err(|e| ProxyError::Internal(format!("invalid upstream path: {e}")))?;

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ProxyError::Internal(format!("invalid upstream uri: {e}")))
    }

    /// Start sending `request`. The returned handle yields the response head.
    pub fn call(&self, request: Request<Body>) -> UpstreamCall {
        let client = self.client.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, client.request(request)).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(ProxyError::Upstream(e.to_string())),
                Err(_) => Err(ProxyError::UpstreamTimeout),
            }
        });

        UpstreamCall { handle }
    }
}

/// An in-flight upstream request.
pub struct UpstreamCall {
    handle: JoinHandle<Result<Response<Incoming>, ProxyError>>,
}

impl UpstreamCall {
    /// Wait for the upstream response head.
    pub async fn response(mut self) -> Result<Response<Incoming>, ProxyError> {
        match (&mut self.handle).await {
            Ok(result) => result,
            Err(e) => Err(ProxyError::Internal(format!("upstream task failed: {e}"))),
        }
    }
}

impl Drop for UpstreamCall {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_url: &str) -> UpstreamClient {
        let config = ProxyConfig {
            api_url: api_url.to_string(),
            ..ProxyConfig::default()
        };
        UpstreamClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn uri_joins_base_and_path() {
        let upstream = client("http://api.internal:8000");
        assert_eq!(
            upstream.uri_for("/users?page=2").unwrap().to_string(),
            "http://api.internal:8000/users?page=2"
        );
    }

    #[tokio::test]
    async fn uri_keeps_base_path_prefix() {
        let upstream = client("http://api.internal/v1/");
        assert_eq!(
            upstream.uri_for("/users").unwrap().to_string(),
            "http://api.internal/v1/users"
        );
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let upstream = client(&format!("http://{addr}"));
        let request = Request::builder()
            .uri(upstream.uri_for("/").unwrap())
            .body(Body::empty())
            .unwrap();

        let err = upstream.call(request).response().await.unwrap_err();
        assert!(matches!(err, ProxyError::Upstream(_)));
    }
}
