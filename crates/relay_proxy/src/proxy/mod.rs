use std::sync::Arc;

use http::StatusCode;
use relay_cache::{CacheController, CacheDirective};
use relay_config::RelayConfig;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

pub(crate) mod coalesce;
pub(crate) mod error;
pub(crate) mod headers;
pub(crate) mod request;
pub(crate) mod response;
pub(crate) mod upstream;

#[cfg(test)]
mod tests;

use coalesce::InFlight;
use error::ProxyError;
use headers::{filter_forward_headers, ControlHeaders};
use request::{parse_target_url, ProxyRequest};
use response::ProxyResponse;
use upstream::{OutboundRequest, Upstream};

/// Result of one upstream exchange, after JSON decoding and the optional
/// cache write. Cloned to every caller joined on a coalesced fetch.
#[derive(Debug, Clone)]
struct Forwarded {
    status: StatusCode,
    body: Value,
    stored: bool,
}

/// =======================================================
/// PROXY
/// =======================================================
///
/// Holds nothing mutable per request: the store sits behind the cache
/// controller, the HTTP client behind `Upstream`. The only optional shared
/// state is the in-flight registry used when miss coalescing is enabled.
///
/// Per request:
///   START -> (INVALIDATE | CACHE_LOOKUP)
///         -> HIT: done
///         -> MISS / no name: FORWARD -> ok: MAYBE_STORE -> done
///                                    -> fail: done(error)
pub struct Proxy {
    cache: CacheController,
    upstream: Arc<dyn Upstream>,
    control: ControlHeaders,
    expose_error_details: bool,
    inflight: Option<InFlight<Result<Forwarded, ProxyError>>>,
}

impl Proxy {
    pub fn new(cache: CacheController, upstream: Arc<dyn Upstream>, cfg: &RelayConfig) -> Self {
        let control = ControlHeaders::new(&cfg.cache.control_header_prefix).unwrap_or_else(|| {
            warn!(
                target: "relay::proxy",
                prefix = %cfg.cache.control_header_prefix,
                "Unusable control header prefix; falling back to x-cache-"
            );
            ControlHeaders::default()
        });

        Self {
            cache,
            upstream,
            control,
            expose_error_details: cfg.http.expose_error_details,
            inflight: cfg.cache.coalesce_misses.then(InFlight::new),
        }
    }

    pub fn control_headers(&self) -> &ControlHeaders {
        &self.control
    }

    pub fn cache(&self) -> &CacheController {
        &self.cache
    }

    /// Entry point: one request in, one normalized response out.
    #[instrument(
        skip_all,
        fields(
            method = %req.method,
            cache_key = req.cache_key.as_deref().unwrap_or("-"),
        )
    )]
    pub async fn handle(&self, req: ProxyRequest) -> ProxyResponse {
        let resp = match self.run(req).await {
            Ok(resp) => resp,
            Err(e) => {
                if e.is_client_error() {
                    debug!(target: "relay::proxy", error = %e, "Rejected request");
                } else {
                    error!(target: "relay::proxy", error = ?e, "Proxy request failed");
                }
                ProxyResponse::from_error(&e, self.expose_error_details)
            }
        };

        info!(
            target: "relay::proxy",
            status = resp.status.as_u16(),
            outcome = resp.outcome.as_str(),
            "Request finished"
        );
        resp
    }

    async fn run(&self, req: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        // 1) validar url antes de tocar la cache
        let target = parse_target_url(req.target_url.as_deref())?;

        // 2) decidir que hace la cache
        let directive = self
            .cache
            .directive(req.cache_key.as_deref(), req.requested_ttl);

        match &directive {
            CacheDirective::Invalidate { key } => {
                self.cache
                    .invalidate(key)
                    .await
                    .map_err(|e| ProxyError::Store(e.to_string()))?;
                return Ok(ProxyResponse::invalidated(key));
            }
            CacheDirective::ReadThrough { key, .. } => {
                if let Some(resp) = self.serve_cached(key).await {
                    return Ok(resp);
                }
            }
            CacheDirective::Bypass => {}
        }

        // 3) miss o sin nombre: forward
        let outbound = self.build_outbound(&req, target);
        let target_url = outbound.url.to_string();

        let forwarded = match (&self.inflight, directive.key()) {
            (Some(inflight), Some(key)) => {
                // mismo nombre con otro destino o ttl no comparte fetch
                let ttl = match &directive {
                    CacheDirective::ReadThrough { ttl_secs, .. } => *ttl_secs,
                    _ => 0,
                };
                let flight_key = format!("{} {} {ttl}\n{key}", outbound.method, target_url);
                inflight
                    .run(&flight_key, || self.fetch_and_store(outbound, &directive))
                    .await?
            }
            _ => self.fetch_and_store(outbound, &directive).await?,
        };

        let cache = match &directive {
            CacheDirective::ReadThrough { key, ttl_secs } => Some((key.as_str(), *ttl_secs)),
            _ => None,
        };

        Ok(ProxyResponse::forwarded(
            forwarded.status,
            forwarded.body,
            &target_url,
            cache,
            forwarded.stored,
        ))
    }

    async fn serve_cached(&self, key: &str) -> Option<ProxyResponse> {
        let entry = self.cache.lookup::<Value>(key).await?;
        match StatusCode::from_u16(entry.status_code) {
            Ok(status) => Some(ProxyResponse::cache_hit(key, status, entry)),
            Err(_) => {
                warn!(
                    target: "relay::proxy",
                    cache_key = %key,
                    status = entry.status_code,
                    "Cached entry has an invalid status; treating as miss"
                );
                None
            }
        }
    }

    fn build_outbound(&self, req: &ProxyRequest, url: Url) -> OutboundRequest {
        let body = if ProxyRequest::wants_body(&req.method, &req.headers) {
            req.body.clone()
        } else {
            None
        };

        OutboundRequest {
            method: req.method.clone(),
            url,
            headers: filter_forward_headers(&req.headers, &self.control),
            body,
        }
    }

    /// One upstream call, JSON decode, then the write-through if asked for.
    /// A failed cache write is logged; the caller still gets the response.
    async fn fetch_and_store(
        &self,
        outbound: OutboundRequest,
        directive: &CacheDirective,
    ) -> Result<Forwarded, ProxyError> {
        let target_url = outbound.url.to_string();

        debug!(
            target: "relay::proxy",
            method = %outbound.method,
            target_url = %target_url,
            has_body = outbound.body.is_some(),
            "Forwarding request to upstream"
        );

        let reply = self
            .upstream
            .send(outbound)
            .await
            .map_err(|source| ProxyError::Transport {
                target_url: target_url.clone(),
                source,
            })?;

        let body = decode_json(&reply.body).map_err(|e| ProxyError::UpstreamDecode {
            target_url: target_url.clone(),
            message: e.to_string(),
        })?;

        let mut stored = false;
        if let CacheDirective::ReadThrough { key, ttl_secs } = directive
            && directive.should_store()
        {
            match self
                .cache
                .store(key, &body, reply.status.as_u16(), *ttl_secs)
                .await
            {
                Ok(written) => stored = written,
                Err(e) => {
                    error!(
                        target: "relay::proxy",
                        cache_key = %key,
                        error = %e,
                        "Cache write failed; returning response uncached"
                    );
                }
            }
        }

        Ok(Forwarded {
            status: reply.status,
            body,
            stored,
        })
    }
}

/// Empty body is `null`; anything else must be JSON.
fn decode_json(body: &[u8]) -> Result<Value, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
}
