//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use axum::Router;
use bytes::Bytes;
use oauth2_proxy::config::ProxyConfig;
use oauth2_proxy::lifecycle::{Services, Shutdown};
use oauth2_proxy::session::{MemoryStore, SessionStore};
use oauth2_proxy::HttpServer;
use serde_json::Value;
use tokio::net::TcpListener;

/// A request as the mock backend saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

/// What the mock backend answers.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl MockReply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![("content-type", "application/json".to_string())],
            body: body.to_string(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }
}

type Responder = Arc<dyn Fn(&Recorded) -> MockReply + Send + Sync>;

#[derive(Clone)]
struct BackendState {
    responder: Responder,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

/// A running programmable backend.
pub struct MockBackend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockBackend {
    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.split('?').next() == Some(path))
            .collect()
    }
}

async fn record_and_reply(State(state): State<BackendState>, request: Request<Body>) -> Response<Body> {
    let (parts, body) = request.into_parts();
    // An aborted body is never handed to the API.
    let Ok(body) = to_bytes(body, usize::MAX).await else {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::BAD_REQUEST;
        return response;
    };
    let recorded = Recorded {
        method: parts.method.to_string(),
        path: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default(),
        headers: parts.headers,
        body,
    };

    let reply = (state.responder)(&recorded);
    state.requests.lock().unwrap().push(recorded);

    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = StatusCode::from_u16(reply.status).unwrap();
    for (name, value) in reply.headers {
        response
            .headers_mut()
            .append(name, value.parse().unwrap());
    }
    response
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F>(f: F) -> MockBackend
where
    F: Fn(&Recorded) -> MockReply + Send + Sync + 'static,
{
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = BackendState {
        responder: Arc::new(f),
        requests: requests.clone(),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(record_and_reply).with_state(state);

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockBackend { addr, requests }
}

/// Proxy configuration pointing at `backend`.
pub fn test_config(backend: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.api_url = format!("http://{backend}");
    config.client_id = "X".to_string();
    config.client_secret = "Y".to_string();
    config.grant_path = "/auth/token".to_string();
    config.revoke_path = "/auth/revoke".to_string();
    config.client_credentials.enabled = false;
    config.timeouts.upstream_secs = 5;
    config
}

/// A proxy listening on an ephemeral port, backed by an inspectable memory store.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub store: MemoryStore,
    pub services: Services,
    pub shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Attributes stored for `session_id`.
    pub async fn stored_session(&self, session_id: &str) -> Option<Value> {
        let raw = self.store.read(session_id).await.unwrap()?;
        serde_json::from_slice(&raw).ok()
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let store = MemoryStore::new();
    let services = Services::with_store(config, Arc::new(store.clone())).unwrap();
    let server = HttpServer::new(services.clone()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestProxy {
        addr,
        store,
        services,
        shutdown,
    }
}

/// A minimal cookie-keeping client.
pub struct Browser {
    client: reqwest::Client,
    base: String,
    cookies: HashMap<String, String>,
}

impl Browser {
    pub fn new(proxy: &TestProxy) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        Self {
            client,
            base: proxy.url(""),
            cookies: HashMap::new(),
        }
    }

    /// The same cookie jar, talking to another proxy.
    pub fn pointed_at(self, proxy: &TestProxy) -> Self {
        Self {
            base: proxy.url(""),
            ..self
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn session_id(&self) -> String {
        self.cookie("oauth2_proxy_session")
            .expect("no session cookie")
            .to_string()
    }

    pub fn xsrf(&self) -> String {
        self.cookie("XSRF-TOKEN").expect("no XSRF cookie").to_string()
    }

    /// A request carrying the current cookies.
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base, path));
        if self.cookies.is_empty() {
            return builder;
        }

        let jar = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        builder.header("cookie", jar)
    }

    /// A state-changing request carrying the CSRF header.
    pub fn protected(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.request(method, path).header("x-xsrf-token", self.xsrf())
    }

    /// Send `builder`, keeping any cookies the proxy sets.
    pub async fn send(&mut self, builder: reqwest::RequestBuilder) -> reqwest::Response {
        let response = builder.send().await.expect("proxy unreachable");
        for value in response.headers().get_all("set-cookie") {
            if let Ok(parsed) = cookie::Cookie::parse(value.to_str().unwrap().to_string()) {
                self.cookies
                    .insert(parsed.name().to_string(), parsed.value().to_string());
            }
        }
        response
    }

    /// Pick up the session and XSRF cookies with a safe request.
    pub async fn bootstrap(&mut self) {
        let request = self.request(reqwest::Method::GET, "/");
        self.send(request).await;
        assert!(self.cookie("oauth2_proxy_session").is_some());
        assert!(self.cookie("XSRF-TOKEN").is_some());
    }
}
