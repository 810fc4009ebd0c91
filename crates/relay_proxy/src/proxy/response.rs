use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use relay_cache::CacheEntry;
use serde_json::{json, Value};
use tracing::debug;

use super::error::ProxyError;

const X_CACHE_HIT: HeaderName = HeaderName::from_static("x-cache-hit");
const X_CACHE_NAME: HeaderName = HeaderName::from_static("x-cache-name");
const X_CACHE_DATE: HeaderName = HeaderName::from_static("x-cache-date");
const X_CACHE_TTL: HeaderName = HeaderName::from_static("x-cache-ttl");
const X_PROXY_STATUS: HeaderName = HeaderName::from_static("x-proxy-status");
const X_TARGET_URL: HeaderName = HeaderName::from_static("x-target-url");

/// Terminal state of one request. Exactly one per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Invalidated,
    CacheHit,
    ForwardedAndCached,
    ForwardedUncached,
    Rejected,
    Failed,
}

impl ProxyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyOutcome::Invalidated => "invalidated",
            ProxyOutcome::CacheHit => "cache_hit",
            ProxyOutcome::ForwardedAndCached => "forwarded_cached",
            ProxyOutcome::ForwardedUncached => "forwarded_uncached",
            ProxyOutcome::Rejected => "rejected",
            ProxyOutcome::Failed => "failed",
        }
    }
}

/// Normalized answer: a JSON body plus diagnostic headers. Never partial.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub body: Value,
    pub headers: HeaderMap,
    pub outcome: ProxyOutcome,
}

impl ProxyResponse {
    fn new(status: StatusCode, body: Value, outcome: ProxyOutcome) -> Self {
        Self {
            status,
            body,
            headers: HeaderMap::new(),
            outcome,
        }
    }

    pub fn invalidated(key: &str) -> Self {
        Self::new(
            StatusCode::OK,
            json!({ "message": "Cache invalidated", "cacheName": key }),
            ProxyOutcome::Invalidated,
        )
    }

    pub fn cache_hit(key: &str, status: StatusCode, entry: CacheEntry) -> Self {
        let date = entry.stored_at_iso();
        let mut resp = Self::new(status, entry.payload, ProxyOutcome::CacheHit);
        resp.set_header(X_CACHE_HIT, "true");
        resp.set_header(X_CACHE_NAME, key);
        resp.set_header(X_CACHE_DATE, &date);
        resp
    }

    /// `cache` is `(name, ttl)` when the caller supplied a cache name.
    pub fn forwarded(
        status: StatusCode,
        body: Value,
        target_url: &str,
        cache: Option<(&str, i64)>,
        stored: bool,
    ) -> Self {
        let outcome = if stored {
            ProxyOutcome::ForwardedAndCached
        } else {
            ProxyOutcome::ForwardedUncached
        };
        let mut resp = Self::new(status, body, outcome);
        resp.set_header(X_PROXY_STATUS, "success");
        resp.set_header(X_TARGET_URL, target_url);
        if let Some((key, ttl)) = cache {
            resp.set_header(X_CACHE_HIT, "false");
            resp.set_header(X_CACHE_NAME, key);
            resp.set_header(X_CACHE_TTL, &ttl.to_string());
        }
        resp
    }

    /// Error body for any [`ProxyError`].
    ///
    /// Forwarding failures get `{error, message, targetUrl}`; `details` only
    /// when explicitly enabled. Request internals are never echoed back.
    pub fn from_error(err: &ProxyError, expose_details: bool) -> Self {
        let status = err.status();
        let (body, outcome) = match err.target_url() {
            Some(target_url) => {
                let mut body = json!({
                    "error": "Proxy request failed",
                    "message": err.caller_message(),
                    "targetUrl": target_url,
                });
                if expose_details {
                    body["details"] = Value::String(format!("{err:?}"));
                }
                (body, ProxyOutcome::Failed)
            }
            None if err.is_client_error() => (json!({ "error": err.to_string() }), ProxyOutcome::Rejected),
            None => (
                json!({ "error": "Cache operation failed", "message": err.caller_message() }),
                ProxyOutcome::Failed,
            ),
        };
        Self::new(status, body, outcome)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn set_header(&mut self, name: HeaderName, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.headers.insert(name, v);
            }
            Err(_) => {
                debug!(target: "relay::proxy", header = %name, "Skipping diagnostic header with unrepresentable value");
            }
        }
    }
}
