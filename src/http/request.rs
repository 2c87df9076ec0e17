//! Inbound client request, rewritten for the upstream API.
//!
//! # Responsibilities
//! - Hold the filtered outbound headers, query parameters and session
//! - Buffer the client body, then stream the rest once dispatched
//! - Dispatch to the upstream API, and re-dispatch once with the full body
//!
//! # Design Decisions
//! - Body state is explicit: `Buffering` until dispatch, `Streaming` while
//!   the rest of the client body is forwarded, `Drained` afterwards
//! - Every byte is kept in the replay buffer, so a retry resends it all
//! - The outbound header set is filtered once, at construction

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::{Body, BodyDataStream, HttpBody};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum::http::{Method, Request};
use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;
use url::form_urlencoded;

use crate::http::error::ProxyError;
use crate::http::headers::{filter_headers, is_denied_request_header, parse_cookies};
use crate::http::upstream::{UpstreamCall, UpstreamClient};
use crate::session::Session;

/// Dispatches allowed per client request: the original and one retry.
const MAX_DISPATCHES: u8 = 2;

/// Chunks queued toward the upstream before `write` waits.
const STREAM_CAPACITY: usize = 16;

type Chunk = Result<Bytes, io::Error>;

enum BodyMode {
    Buffering,
    /// The upstream body ends cleanly only once `complete` is set.
    Streaming {
        tx: mpsc::Sender<Chunk>,
        complete: Arc<AtomicBool>,
    },
    Drained,
}

/// The client request as the pipeline sees it.
pub struct ProxyRequest {
    method: Method,
    uri_path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    cookies: HashMap<String, String>,
    session: Session,
    inbound: Option<BodyDataStream>,
    buffer: BytesMut,
    mode: BodyMode,
    upstream: UpstreamClient,
    pending: Option<UpstreamCall>,
    dispatches: u8,
}

impl ProxyRequest {
    pub fn new(parts: Parts, body: Body, session: Session, upstream: UpstreamClient) -> Self {
        let query = parts
            .uri
            .query()
            .map(|raw| form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let inbound = (!body.is_end_stream()).then(|| body.into_data_stream());

        Self {
            method: parts.method,
            uri_path: parts.uri.path().to_string(),
            query,
            headers: filter_headers(&parts.headers, is_denied_request_header),
            cookies: parse_cookies(&parts.headers),
            session,
            inbound,
            buffer: BytesMut::new(),
            mode: BodyMode::Buffering,
            upstream,
            pending: None,
            dispatches: 0,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path without the query string.
    pub fn uri_path(&self) -> &str {
        &self.uri_path
    }

    /// Path plus re-encoded query, e.g. `/users?page=2&sort=name`.
    pub fn path(&self) -> String {
        if self.query.is_empty() {
            return self.uri_path.clone();
        }

        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{}?{}", self.uri_path, query)
    }

    /// Set query parameter `name`, replacing an existing value in place.
    pub fn set_query(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.query.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value,
            None => self.query.push((name.to_string(), value)),
        }
    }

    /// Outbound headers, already stripped of the request denylist.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Header value as text, if present and valid.
    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn set_authorization(&mut self, value: &str) -> Result<(), ProxyError> {
        let value = HeaderValue::from_str(value)
            .map_err(|_| ProxyError::Internal("grant produced an invalid header".to_string()))?;
        self.headers.insert(header::AUTHORIZATION, value);
        Ok(())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Append `data` to the replay buffer, forwarding it when streaming.
    pub async fn write(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);

        if let BodyMode::Streaming { tx, .. } = &self.mode {
            if tx.send(Ok(data)).await.is_err() {
                debug!("Upstream stopped reading the request body");
            }
        }
    }

    /// Read the whole client body into the buffer and return it.
    pub async fn read_to_end(&mut self) -> Result<Bytes, ProxyError> {
        while let Some(chunk) = self.next_inbound().await? {
            self.write(chunk).await;
        }
        Ok(self.buffer.clone().freeze())
    }

    /// Replace the buffered body. Only valid before dispatch.
    pub fn replace_body(&mut self, body: Bytes) -> Result<(), ProxyError> {
        if !matches!(self.mode, BodyMode::Buffering) || self.inbound.is_some() {
            return Err(ProxyError::Internal(
                "body can only be replaced once fully buffered".to_string(),
            ));
        }

        self.buffer = BytesMut::from(&body[..]);
        self.headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(self.buffer.len()));
        self.headers.remove(header::TRANSFER_ENCODING);
        Ok(())
    }

    /// Bytes received from the client so far.
    pub fn body(&self) -> &[u8] {
        &self.buffer
    }

    pub fn dispatch_count(&self) -> u8 {
        self.dispatches
    }

    /// Send the request upstream.
    ///
    /// Whatever is buffered goes first; if the client body is still arriving
    /// the request switches to streaming and `finish_body` forwards the rest.
    pub fn dispatch(&mut self) -> Result<(), ProxyError> {
        if self.dispatches > 0 {
            return Err(ProxyError::Internal("request already dispatched".to_string()));
        }

        let body = if self.inbound.is_none() {
            self.mode = BodyMode::Drained;
            Body::from(self.buffer.clone().freeze())
        } else {
            let (tx, rx) = mpsc::channel::<Chunk>(STREAM_CAPACITY);
            let complete = Arc::new(AtomicBool::new(false));
            let prefix = (!self.buffer.is_empty()).then(|| Ok(self.buffer.clone().freeze()));
            self.mode = BodyMode::Streaming {
                tx,
                complete: complete.clone(),
            };

            let rest = stream::unfold(Some(rx), move |rx| {
                let complete = complete.clone();
                async move {
                    let Some(mut rx) = rx else {
                        return None;
                    };
                    match rx.recv().await {
                        Some(chunk) => Some((chunk, Some(rx))),
                        None if complete.load(Ordering::Acquire) => None,
                        None => Some((Err(truncated()), None)),
                    }
                }
            });
            Body::from_stream(stream::iter(prefix).chain(rest))
        };

        self.send(body)
    }

    /// Forward the remainder of the client body, then close the upstream body.
    ///
    /// If the client body fails partway, the upstream body fails too and the
    /// in-flight call is dropped, so the API never sees a truncated request.
    pub async fn finish_body(&mut self) -> Result<(), ProxyError> {
        loop {
            match self.next_inbound().await {
                Ok(Some(chunk)) => self.write(chunk).await,
                Ok(None) => break,
                Err(e) => {
                    if let BodyMode::Streaming { tx, .. } = &self.mode {
                        let _ = tx.try_send(Err(truncated()));
                    }
                    self.mode = BodyMode::Drained;
                    self.pending = None;
                    return Err(e);
                }
            }
        }

        if let BodyMode::Streaming { complete, .. } = &self.mode {
            complete.store(true, Ordering::Release);
        }
        self.mode = BodyMode::Drained;
        Ok(())
    }

    /// Re-send the request with the complete original body.
    pub fn retry(&mut self) -> Result<(), ProxyError> {
        if self.dispatches >= MAX_DISPATCHES {
            return Err(ProxyError::Internal("request already retried".to_string()));
        }
        if self.inbound.is_some() {
            return Err(ProxyError::Internal(
                "cannot retry before the client body is complete".to_string(),
            ));
        }

        self.pending = None;
        self.mode = BodyMode::Drained;
        self.headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(self.buffer.len()));
        self.headers.remove(header::TRANSFER_ENCODING);

        let body = Body::from(self.buffer.clone().freeze());
        self.send(body)
    }

    /// Take the in-flight upstream call, if any.
    pub fn take_upstream(&mut self) -> Option<UpstreamCall> {
        self.pending.take()
    }

    fn send(&mut self, body: Body) -> Result<(), ProxyError> {
        let uri = self.upstream.uri_for(&self.path())?;
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(uri)
            .body(body)
            .map_err(|e| ProxyError::Internal(format!("failed to build upstream request: {e}")))?;
        *request.headers_mut() = self.headers.clone();

        self.dispatches += 1;
        debug!(
            method = %self.method,
            path = %self.path(),
            attempt = self.dispatches,
            "Dispatching upstream"
        );
        self.pending = Some(self.upstream.call(request));
        Ok(())
    }

    async fn next_inbound(&mut self) -> Result<Option<Bytes>, ProxyError> {
        let Some(inbound) = self.inbound.as_mut() else {
            return Ok(None);
        };

        match inbound.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => {
                self.inbound = None;
                Err(ProxyError::RequestBody(e.to_string()))
            }
            None => {
                self.inbound = None;
                Ok(None)
            }
        }
    }
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "client body ended early")
}
