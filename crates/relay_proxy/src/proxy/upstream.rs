use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode};
use relay_config::HttpConfig;
use tracing::{debug, instrument};
use url::Url;

use super::error::TransportError;

/// What goes to the target: already filtered, body already decided.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// A completed exchange. Any status counts, 4xx/5xx included.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub body: Bytes,
}

/// The single suspension point towards the target.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, req: OutboundRequest) -> Result<UpstreamReply, TransportError>;
}

/// =======================================================
/// HTTP UPSTREAM (reqwest)
/// =======================================================
///
/// One shared client (connection pool, DNS, TLS) for every request.
/// - connect timeout + total timeout come from `[http]`
/// - the body is buffered with a hard cap
/// - no retries: one call, one outcome
pub struct HttpUpstream {
    client: reqwest::Client,
    max_body: usize,
}

impl HttpUpstream {
    pub fn new(http: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(http.upstream_connect_timeout_secs))
            .timeout(Duration::from_secs(http.upstream_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            max_body: usize::try_from(http.max_upstream_response_body_bytes).unwrap_or(usize::MAX),
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    #[instrument(skip_all, fields(method = %req.method, target_url = %req.url))]
    async fn send(&self, req: OutboundRequest) -> Result<UpstreamReply, TransportError> {
        let mut builder = self
            .client
            .request(req.method, req.url)
            .headers(req.headers);
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let mut resp = builder.send().await.map_err(classify)?;
        let status = resp.status();

        if let Some(len) = resp.content_length()
            && len > self.max_body as u64
        {
            return Err(TransportError::TooLarge {
                limit: self.max_body,
            });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = resp.chunk().await.map_err(classify)? {
            if body.len() + chunk.len() > self.max_body {
                return Err(TransportError::TooLarge {
                    limit: self.max_body,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(
            target: "relay::proxy",
            status = status.as_u16(),
            bytes = body.len(),
            "Upstream response received"
        );

        Ok(UpstreamReply {
            status,
            body: body.freeze(),
        })
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    let message = error_chain(&e);
    if e.is_timeout() {
        TransportError::Timeout(message)
    } else if e.is_connect() {
        TransportError::Connect(message)
    } else {
        TransportError::Other(message)
    }
}

/// `outer: inner: innermost`, so DNS / refused details survive.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        let msg = inner.to_string();
        if !out.contains(&msg) {
            out.push_str(": ");
            out.push_str(&msg);
        }
        source = inner.source();
    }
    out
}
