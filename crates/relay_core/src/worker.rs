use std::{convert::Infallible, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use relay_config::HttpConfig;
use relay_proxy::{
    parse_target_url, target_url_from_query, Proxy, ProxyError, ProxyRequest, ProxyResponse,
};
use serde_json::json;
use tracing::{debug, error, warn};

/// Per-request limits for the inbound side, taken from `[http]`.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub max_body: usize,
    pub read_timeout: Duration,
}

impl RequestLimits {
    pub fn from_config(http: &HttpConfig) -> Self {
        Self {
            max_body: usize::try_from(http.max_request_body_bytes).unwrap_or(usize::MAX),
            read_timeout: Duration::from_secs(http.client_read_timeout_secs),
        }
    }
}

/// =======================================================
/// WORKER: one hyper request -> one proxy call
/// =======================================================
///
/// 1) reject a missing/invalid `url` before touching the body
/// 2) buffer the body once, only when it will be forwarded
/// 3) split into `ProxyRequest`
/// 4) run the proxy
/// 5) serialize `ProxyResponse` as JSON + diagnostic headers
///
/// Never fails at the hyper level: every outcome is a JSON response.
pub async fn handle_request<B>(
    req: Request<B>,
    proxy: Arc<Proxy>,
    limits: RequestLimits,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();

    debug!(
        target: "relay::worker",
        method = %parts.method,
        uri = %parts.uri,
        "Incoming request"
    );

    // url primero: un request sin destino es 400 aunque el body sea enorme
    let target = target_url_from_query(parts.uri.query());
    if let Err(e) = parse_target_url(target.as_deref()) {
        debug!(target: "relay::worker", error = %e, "Rejected before reading body");
        return Ok(into_http(ProxyResponse::from_error(&e, false)));
    }

    let body = if ProxyRequest::wants_body(&parts.method, &parts.headers) {
        match read_body(body, &parts.headers, limits).await {
            Ok(bytes) => Some(bytes),
            Err(resp) => return Ok(resp),
        }
    } else {
        None
    };

    let proxy_req = ProxyRequest::from_parts(
        parts.method,
        &parts.uri,
        parts.headers,
        body,
        proxy.control_headers(),
    );

    let resp = proxy.handle(proxy_req).await;
    Ok(into_http(resp))
}

async fn read_body<B>(
    body: B,
    headers: &HeaderMap,
    limits: RequestLimits,
) -> Result<Bytes, Response<Full<Bytes>>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let too_large = || {
        into_http(ProxyResponse::from_error(
            &ProxyError::BodyTooLarge {
                limit: limits.max_body,
            },
            false,
        ))
    };

    // Content-Length declarado: rechazar sin leer nada
    if let Some(len) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        && len > limits.max_body as u64
    {
        debug!(target: "relay::worker", content_length = len, "Request body over limit");
        return Err(too_large());
    }

    let collected = tokio::time::timeout(
        limits.read_timeout,
        Limited::new(body, limits.max_body).collect(),
    )
    .await;

    match collected {
        Ok(Ok(c)) => Ok(c.to_bytes()),
        Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => {
            debug!(target: "relay::worker", "Request body over limit while streaming");
            Err(too_large())
        }
        Ok(Err(e)) => {
            warn!(target: "relay::worker", error = %e, "Failed to read request body");
            Err(json_response(
                StatusCode::BAD_REQUEST,
                json!({ "error": "Failed to read request body" }),
            ))
        }
        Err(_) => {
            warn!(
                target: "relay::worker",
                timeout_secs = limits.read_timeout.as_secs(),
                "Timed out reading request body"
            );
            Err(json_response(
                StatusCode::REQUEST_TIMEOUT,
                json!({ "error": "Timed out reading request body" }),
            ))
        }
    }
}

/// `ProxyResponse` -> hyper response. Body is always JSON.
pub fn into_http(resp: ProxyResponse) -> Response<Full<Bytes>> {
    let mut out = json_response(resp.status, resp.body);
    for (name, value) in resp.headers.iter() {
        out.headers_mut().insert(name.clone(), value.clone());
    }
    out
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    let bytes = match serde_json::to_vec(&body) {
        Ok(v) => Bytes::from(v),
        Err(e) => {
            error!(target: "relay::worker", error = %e, "Failed to serialize response body");
            Bytes::from_static(b"null")
        }
    };

    let mut resp = Response::new(Full::new(bytes));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}
