use bytes::Bytes;
use http::{header, HeaderMap, Method, Uri};
use tracing::warn;
use url::Url;

use super::error::ProxyError;
use super::headers::ControlHeaders;

/// One inbound call, already split into what the proxy cares about.
///
/// `body` is only ever set for non-GET requests that carry a `content-type`;
/// it was buffered once by the listener and is never re-read.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Raw `url` query value. Validated by the proxy, not here.
    pub target_url: Option<String>,
    pub cache_key: Option<String>,
    /// `None` when the caller did not send a usable TTL.
    pub requested_ttl: Option<i64>,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ProxyRequest {
    /// Build from the pieces of an HTTP request. Pass `body` only when
    /// [`ProxyRequest::wants_body`] said so.
    pub fn from_parts(
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Option<Bytes>,
        control: &ControlHeaders,
    ) -> Self {
        let cache_key = headers
            .get(control.name_header())
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let requested_ttl = headers
            .get(control.ttl_header())
            .and_then(|v| parse_ttl(v.to_str().unwrap_or_default()));

        let body = if Self::wants_body(&method, &headers) {
            body
        } else {
            None
        };

        Self {
            target_url: target_url_from_query(uri.query()),
            cache_key,
            requested_ttl,
            method,
            headers,
            body,
        }
    }

    /// GET never carries a body; anything else does only with a content-type.
    pub fn wants_body(method: &Method, headers: &HeaderMap) -> bool {
        *method != Method::GET && headers.contains_key(header::CONTENT_TYPE)
    }
}

/// Percent-decoded value of the first `url` query parameter.
pub fn target_url_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.into_owned())
}

/// Absolute `http`/`https` URL, or the client error to answer with.
pub fn parse_target_url(raw: Option<&str>) -> Result<Url, ProxyError> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or(ProxyError::MissingUrl)?;
    let url = Url::parse(raw).map_err(|e| ProxyError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProxyError::InvalidUrl(format!("unsupported scheme '{other}'"))),
    }
}

fn parse_ttl(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    match raw.parse::<i64>() {
        Ok(ttl) => Some(ttl),
        Err(_) => {
            warn!(target: "relay::proxy", ttl = %raw, "Ignoring unparseable cache TTL; using default");
            None
        }
    }
}
