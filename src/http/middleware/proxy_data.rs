//! Terminal stage: moves bytes between the client and the upstream API.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header;
use futures_util::StreamExt;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::http::error::ProxyError;
use crate::http::middleware::pipeline::{Exchange, RequestFlow, ResponseFlow, Stage};
use crate::http::upstream::UpstreamClient;

pub struct ProxyDataStage {
    upstream: UpstreamClient,
}

impl ProxyDataStage {
    pub fn new(upstream: UpstreamClient) -> Self {
        Self { upstream }
    }
}

#[async_trait]
impl Stage for ProxyDataStage {
    fn name(&self) -> &'static str {
        "proxy_data"
    }

    async fn on_request(&self, exchange: &mut Exchange) -> Result<RequestFlow, ProxyError> {
        exchange.request.dispatch()?;
        exchange.request.finish_body().await?;
        Ok(RequestFlow::Continue)
    }

    /// Collect the upstream body until the declared length or end of stream.
    async fn on_response(&self, exchange: &mut Exchange) -> Result<ResponseFlow, ProxyError> {
        let Some(call) = exchange.request.take_upstream() else {
            return Ok(ResponseFlow::Continue);
        };

        let deadline = Instant::now() + self.upstream.timeout();
        let upstream = call.response().await?;
        let (parts, body) = upstream.into_parts();

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok());

        exchange.response.set_upstream_status(parts.status);
        exchange.response.merge_upstream_headers(&parts.headers);

        let mut stream = Body::new(body).into_data_stream();
        loop {
            if declared.is_some_and(|length| exchange.response.data_len() >= length) {
                break;
            }

            let next = match timeout_at(deadline, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    exchange.response.reset_upstream();
                    return Err(ProxyError::UpstreamTimeout);
                }
            };

            match next {
                Some(Ok(chunk)) => exchange.response.write(&chunk)?,
                Some(Err(e)) => {
                    exchange.response.reset_upstream();
                    return Err(ProxyError::Upstream(e.to_string()));
                }
                None => break,
            }
        }

        debug!(
            request_id = %exchange.id,
            status = parts.status.as_u16(),
            bytes = exchange.response.data_len(),
            "Upstream response collected"
        );
        Ok(ResponseFlow::Continue)
    }
}
