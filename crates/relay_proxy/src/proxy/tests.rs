use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use relay_cache::{CacheController, CacheEntry, KvStore, MemoryStore};
use relay_config::RelayConfig;
use serde_json::{json, Value};

use super::Proxy;
use crate::{
    ControlHeaders, OutboundRequest, ProxyOutcome, ProxyRequest, TransportError, Upstream,
    UpstreamReply,
};

/// Scripted upstream that records every call it receives.
struct FakeUpstream {
    calls: Mutex<Vec<OutboundRequest>>,
    count: AtomicUsize,
    status: StatusCode,
    delay: Duration,
    reply: Box<dyn Fn(usize) -> Result<Bytes, TransportError> + Send + Sync>,
}

impl FakeUpstream {
    fn json(status: StatusCode, body: Value) -> Arc<Self> {
        let raw = Bytes::from(serde_json::to_vec(&body).expect("encode"));
        Self::with(status, Duration::ZERO, move |_| Ok(raw.clone()))
    }

    fn failing(err: TransportError) -> Arc<Self> {
        Self::with(StatusCode::OK, Duration::ZERO, move |_| Err(err.clone()))
    }

    fn with(
        status: StatusCode,
        delay: Duration,
        reply: impl Fn(usize) -> Result<Bytes, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
            status,
            delay,
            reply: Box::new(reply),
        })
    }

    fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn last_call(&self) -> OutboundRequest {
        self.calls
            .lock()
            .expect("lock")
            .last()
            .cloned()
            .expect("upstream was called")
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn send(&self, req: OutboundRequest) -> Result<UpstreamReply, TransportError> {
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().expect("lock").push(req);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let body = (self.reply)(n)?;
        Ok(UpstreamReply {
            status: self.status,
            body,
        })
    }
}

struct Harness {
    proxy: Arc<Proxy>,
    store: Arc<MemoryStore>,
    upstream: Arc<FakeUpstream>,
}

fn harness_with(upstream: Arc<FakeUpstream>, cfg: RelayConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cache = CacheController::new(store.clone(), cfg.cache.default_ttl_secs);
    let proxy = Arc::new(Proxy::new(cache, upstream.clone(), &cfg));
    Harness {
        proxy,
        store,
        upstream,
    }
}

fn harness(upstream: Arc<FakeUpstream>) -> Harness {
    harness_with(upstream, RelayConfig::default())
}

fn request(
    method: Method,
    uri: &str,
    headers: &[(&'static str, &'static str)],
    body: Option<&'static [u8]>,
) -> ProxyRequest {
    let mut map = HeaderMap::new();
    for &(name, value) in headers {
        map.append(name, HeaderValue::from_static(value));
    }
    let uri: Uri = uri.parse().expect("uri");
    ProxyRequest::from_parts(
        method,
        &uri,
        map,
        body.map(Bytes::from_static),
        &ControlHeaders::default(),
    )
}

fn get(uri: &str, headers: &[(&'static str, &'static str)]) -> ProxyRequest {
    request(Method::GET, uri, headers, None)
}

async fn stored_entry(store: &MemoryStore, key: &str) -> Option<CacheEntry> {
    let bytes = store.get(key).await.expect("store get")?;
    Some(CacheEntry::from_bytes(&bytes).expect("decode entry"))
}

#[tokio::test]
async fn missing_url_is_400_for_any_method_and_skips_everything() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!({})));
    for method in [Method::GET, Method::POST, Method::DELETE] {
        let resp = h
            .proxy
            .handle(request(
                method,
                "/anything",
                &[("x-cache-name", "k"), ("x-cache-ttl", "0")],
                None,
            ))
            .await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert!(resp.body["error"].is_string());
        assert_eq!(resp.outcome, ProxyOutcome::Rejected);
    }
    assert_eq!(h.upstream.call_count(), 0);
}

#[tokio::test]
async fn relative_or_non_http_url_is_400() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!({})));
    for uri in ["/?url=/just/a/path", "/?url=ftp%3A%2F%2Fhost%2Ffile", "/?url="] {
        let resp = h.proxy.handle(get(uri, &[])).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "uri {uri}");
    }
    assert_eq!(h.upstream.call_count(), 0);
}

#[tokio::test]
async fn ttl_zero_invalidates_even_without_prior_entry() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!({})));

    let resp = h
        .proxy
        .handle(get(
            "/?url=https://api.example.com/data",
            &[("x-cache-name", "gone"), ("x-cache-ttl", "0")],
        ))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body, json!({"message": "Cache invalidated", "cacheName": "gone"}));
    assert_eq!(resp.outcome, ProxyOutcome::Invalidated);
    assert_eq!(h.upstream.call_count(), 0);
}

#[tokio::test]
async fn ttl_zero_removes_live_entry() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!({})));
    h.proxy
        .cache()
        .store("k", &json!({"old": true}), 200, 60)
        .await
        .expect("seed");

    let resp = h
        .proxy
        .handle(get(
            "/?url=https://api.example.com/data",
            &[("x-cache-name", "k"), ("x-cache-ttl", "0")],
        ))
        .await;
    assert_eq!(resp.body["cacheName"], "k");
    assert!(stored_entry(&h.store, "k").await.is_none());
    assert_eq!(h.upstream.call_count(), 0);
}

#[tokio::test]
async fn miss_forwards_and_caches_with_default_ttl() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!({"items": [1, 2]})));

    let resp = h
        .proxy
        .handle(get(
            "/?url=https://api.example.com/data",
            &[("x-cache-name", "mydata")],
        ))
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body, json!({"items": [1, 2]}));
    assert_eq!(resp.outcome, ProxyOutcome::ForwardedAndCached);
    assert_eq!(resp.header("x-cache-hit"), Some("false"));
    assert_eq!(resp.header("x-cache-name"), Some("mydata"));
    assert_eq!(resp.header("x-cache-ttl"), Some("3600"));
    assert_eq!(resp.header("x-proxy-status"), Some("success"));
    assert_eq!(resp.header("x-target-url"), Some("https://api.example.com/data"));

    assert_eq!(h.upstream.call_count(), 1);
    assert_eq!(h.upstream.last_call().url.as_str(), "https://api.example.com/data");

    let entry = stored_entry(&h.store, "mydata").await.expect("cached");
    assert_eq!(entry.payload, json!({"items": [1, 2]}));
    assert_eq!(entry.status_code, 200);
}

#[tokio::test]
async fn hit_is_served_without_calling_upstream() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!("live")));
    h.proxy
        .cache()
        .store("k", &json!({"cached": 1}), 418, 60)
        .await
        .expect("seed");
    let seeded = stored_entry(&h.store, "k").await.expect("seeded");

    let resp = h
        .proxy
        .handle(get("/?url=https://api.example.com/data", &[("x-cache-name", "k")]))
        .await;

    assert_eq!(h.upstream.call_count(), 0);
    assert_eq!(resp.status.as_u16(), 418);
    assert_eq!(resp.body, json!({"cached": 1}));
    assert_eq!(resp.outcome, ProxyOutcome::CacheHit);
    assert_eq!(resp.header("x-cache-hit"), Some("true"));
    assert_eq!(resp.header("x-cache-name"), Some("k"));
    assert_eq!(resp.header("x-cache-date"), Some(seeded.stored_at_iso().as_str()));
    assert!(resp.header("x-proxy-status").is_none());
}

#[tokio::test]
async fn second_request_hits_what_the_first_stored() {
    let h = harness(FakeUpstream::json(StatusCode::CREATED, json!({"n": 1})));
    let headers = [("x-cache-name", "rt"), ("x-cache-ttl", "30")];

    let first = h
        .proxy
        .handle(get("/?url=https://api.example.com/n", &headers))
        .await;
    assert_eq!(first.outcome, ProxyOutcome::ForwardedAndCached);

    let second = h
        .proxy
        .handle(get("/?url=https://api.example.com/n", &headers))
        .await;
    assert_eq!(second.outcome, ProxyOutcome::CacheHit);
    assert_eq!(second.status, StatusCode::CREATED);
    assert_eq!(second.body, json!({"n": 1}));
    assert_eq!(h.upstream.call_count(), 1);
}

#[tokio::test]
async fn no_cache_name_never_stores() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!(1)));
    let resp = h
        .proxy
        .handle(get("/?url=https://api.example.com/data", &[("x-cache-ttl", "60")]))
        .await;
    assert_eq!(resp.outcome, ProxyOutcome::ForwardedUncached);
    assert!(resp.header("x-cache-hit").is_none());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn negative_ttl_forwards_without_storing() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!(1)));
    let resp = h
        .proxy
        .handle(get(
            "/?url=https://api.example.com/data",
            &[("x-cache-name", "k"), ("x-cache-ttl", "-1")],
        ))
        .await;
    assert_eq!(resp.outcome, ProxyOutcome::ForwardedUncached);
    assert_eq!(resp.header("x-cache-ttl"), Some("-1"));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn max_i64_ttl_is_cached_and_answered() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!({"long": true})));
    let headers = [("x-cache-name", "k"), ("x-cache-ttl", "9223372036854775807")];

    let resp = h
        .proxy
        .handle(get("/?url=https://api.example.com/data", &headers))
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.outcome, ProxyOutcome::ForwardedAndCached);
    assert_eq!(resp.header("x-cache-ttl"), Some("9223372036854775807"));

    let again = h
        .proxy
        .handle(get("/?url=https://api.example.com/data", &headers))
        .await;
    assert_eq!(again.outcome, ProxyOutcome::CacheHit);
    assert_eq!(again.body, json!({"long": true}));
    assert_eq!(h.upstream.call_count(), 1);
}

#[tokio::test]
async fn upstream_error_status_is_passed_through_and_cached() {
    let h = harness(FakeUpstream::json(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({"error": "maintenance"}),
    ));
    let resp = h
        .proxy
        .handle(get("/?url=https://api.example.com/data", &[("x-cache-name", "k")]))
        .await;

    assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.body, json!({"error": "maintenance"}));
    assert_eq!(resp.header("x-proxy-status"), Some("success"));
    let entry = stored_entry(&h.store, "k").await.expect("cached");
    assert_eq!(entry.status_code, 503);
}

#[tokio::test]
async fn transport_failure_is_500_and_never_cached() {
    let h = harness(FakeUpstream::failing(TransportError::Connect(
        "dns error: failed to lookup address information".into(),
    )));

    let resp = h
        .proxy
        .handle(get(
            "/?url=https://no-such-host.invalid/data",
            &[("x-cache-name", "k")],
        ))
        .await;

    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.outcome, ProxyOutcome::Failed);
    assert_eq!(resp.body["error"], "Proxy request failed");
    assert!(resp.body["message"].as_str().unwrap().contains("dns error"));
    assert_eq!(resp.body["targetUrl"], "https://no-such-host.invalid/data");
    assert!(resp.body.get("details").is_none());
    assert!(h.store.is_empty());
    assert_eq!(h.upstream.call_count(), 1);
}

#[tokio::test]
async fn timeout_is_a_forwarding_failure() {
    let h = harness(FakeUpstream::failing(TransportError::Timeout(
        "operation timed out".into(),
    )));
    let resp = h
        .proxy
        .handle(get("/?url=https://slow.example.com/", &[]))
        .await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.body["message"], "timed out: operation timed out");
}

#[tokio::test]
async fn non_json_upstream_body_is_a_failure_and_not_cached() {
    let h = harness(FakeUpstream::with(StatusCode::OK, Duration::ZERO, |_| {
        Ok(Bytes::from_static(b"<html>hi</html>"))
    }));
    let resp = h
        .proxy
        .handle(get("/?url=https://api.example.com/page", &[("x-cache-name", "k")]))
        .await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.body["targetUrl"], "https://api.example.com/page");
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn empty_upstream_body_is_null() {
    let h = harness(FakeUpstream::with(StatusCode::NO_CONTENT, Duration::ZERO, |_| {
        Ok(Bytes::new())
    }));
    let resp = h
        .proxy
        .handle(get("/?url=https://api.example.com/empty", &[]))
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
    assert_eq!(resp.body, Value::Null);
}

#[tokio::test]
async fn control_headers_stripped_others_forwarded() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!({})));
    h.proxy
        .handle(get(
            "/?url=https://api.example.com/data",
            &[
                ("authorization", "Bearer secret"),
                ("x-cache-name", "k"),
                ("x-cache-ttl", "10"),
                ("x-cache-anything", "nope"),
                ("accept-language", "es"),
            ],
        ))
        .await;

    let call = h.upstream.last_call();
    assert_eq!(call.headers.get("authorization").unwrap(), "Bearer secret");
    assert_eq!(call.headers.get("accept-language").unwrap(), "es");
    assert!(call
        .headers
        .keys()
        .all(|k| !k.as_str().starts_with("x-cache-")));
}

#[tokio::test]
async fn body_forwarded_only_with_content_type_on_non_get() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!({})));

    h.proxy
        .handle(request(
            Method::PATCH,
            "/?url=https://api.example.com/items/1",
            &[("content-type", "application/json")],
            Some(&b"{\"name\":\"x\"}"[..]),
        ))
        .await;
    let call = h.upstream.last_call();
    assert_eq!(call.method, Method::PATCH);
    assert_eq!(call.body.as_deref(), Some(&b"{\"name\":\"x\"}"[..]));

    h.proxy
        .handle(request(
            Method::POST,
            "/?url=https://api.example.com/items",
            &[],
            Some(&b"raw"[..]),
        ))
        .await;
    assert!(h.upstream.last_call().body.is_none());

    h.proxy
        .handle(request(
            Method::GET,
            "/?url=https://api.example.com/items",
            &[("content-type", "application/json")],
            Some(&b"{}"[..]),
        ))
        .await;
    assert!(h.upstream.last_call().body.is_none());
}

#[tokio::test]
async fn arbitrary_methods_are_forwarded() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!({})));
    let purge = Method::from_bytes(b"PURGE").expect("method");
    h.proxy
        .handle(request(purge.clone(), "/?url=https://api.example.com/x", &[], None))
        .await;
    assert_eq!(h.upstream.last_call().method, purge);
}

#[tokio::test]
async fn corrupt_entry_is_refetched_and_overwritten() {
    let h = harness(FakeUpstream::json(StatusCode::OK, json!({"fresh": true})));
    h.store
        .put("k", b"\x00garbage".to_vec(), Duration::from_secs(60))
        .await
        .expect("seed");

    let resp = h
        .proxy
        .handle(get("/?url=https://api.example.com/data", &[("x-cache-name", "k")]))
        .await;
    assert_eq!(resp.outcome, ProxyOutcome::ForwardedAndCached);
    assert_eq!(h.upstream.call_count(), 1);
    let entry = stored_entry(&h.store, "k").await.expect("overwritten");
    assert_eq!(entry.payload, json!({"fresh": true}));
}

#[tokio::test]
async fn concurrent_misses_may_stampede_but_last_write_wins() {
    let upstream = FakeUpstream::with(StatusCode::OK, Duration::from_millis(30), |n| {
        Ok(Bytes::from(format!("{{\"writer\":{n}}}")))
    });
    let h = harness(upstream);

    let a = {
        let proxy = h.proxy.clone();
        tokio::spawn(async move {
            proxy
                .handle(get("/?url=https://api.example.com/race", &[("x-cache-name", "race")]))
                .await
        })
    };
    let b = {
        let proxy = h.proxy.clone();
        tokio::spawn(async move {
            proxy
                .handle(get("/?url=https://api.example.com/race", &[("x-cache-name", "race")]))
                .await
        })
    };
    let (a, b) = (a.await.expect("join"), b.await.expect("join"));
    assert_eq!(a.status, StatusCode::OK);
    assert_eq!(b.status, StatusCode::OK);
    assert_eq!(h.upstream.call_count(), 2);

    let entry = stored_entry(&h.store, "race").await.expect("one winner");
    assert!(entry.payload == json!({"writer": 0}) || entry.payload == json!({"writer": 1}));
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn coalescing_collapses_concurrent_misses() {
    let upstream = FakeUpstream::with(StatusCode::OK, Duration::from_millis(50), |n| {
        Ok(Bytes::from(format!("{{\"fetch\":{n}}}")))
    });
    let mut cfg = RelayConfig::default();
    cfg.cache.coalesce_misses = true;
    let h = harness_with(upstream, cfg);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let proxy = h.proxy.clone();
        handles.push(tokio::spawn(async move {
            proxy
                .handle(get("/?url=https://api.example.com/hot", &[("x-cache-name", "hot")]))
                .await
        }));
    }

    for handle in handles {
        let resp = handle.await.expect("join");
        assert_eq!(resp.body, json!({"fetch": 0}));
    }
    assert_eq!(h.upstream.call_count(), 1);
}

#[tokio::test]
async fn coalescing_does_not_share_across_targets() {
    let upstream = FakeUpstream::with(StatusCode::OK, Duration::from_millis(50), |n| {
        Ok(Bytes::from(format!("{{\"fetch\":{n}}}")))
    });
    let mut cfg = RelayConfig::default();
    cfg.cache.coalesce_misses = true;
    let h = harness_with(upstream, cfg);

    let a = {
        let proxy = h.proxy.clone();
        tokio::spawn(async move {
            proxy
                .handle(get("/?url=https://api.example.com/a", &[("x-cache-name", "shared")]))
                .await
        })
    };
    let b = {
        let proxy = h.proxy.clone();
        tokio::spawn(async move {
            proxy
                .handle(get("/?url=https://api.example.com/b", &[("x-cache-name", "shared")]))
                .await
        })
    };
    let a = a.await.expect("join a");
    let b = b.await.expect("join b");

    assert_eq!(h.upstream.call_count(), 2);
    assert_ne!(a.body, b.body);

    let fetched = [json!({"fetch": 0}), json!({"fetch": 1})];
    assert!(fetched.contains(&a.body) && fetched.contains(&b.body));

    let calls = h.upstream.calls.lock().expect("lock").clone();
    let mut paths: Vec<_> = calls.iter().map(|c| c.url.path().to_string()).collect();
    paths.sort();
    assert_eq!(paths, ["/a", "/b"]);
}

#[tokio::test]
async fn verbose_errors_are_opt_in() {
    let mut cfg = RelayConfig::default();
    cfg.http.expose_error_details = true;
    let h = harness_with(
        FakeUpstream::failing(TransportError::Other("reset".into())),
        cfg,
    );
    let resp = h
        .proxy
        .handle(get("/?url=https://api.example.com/", &[]))
        .await;
    assert!(resp.body["details"].is_string());
}

#[tokio::test]
async fn configured_default_ttl_is_used() {
    let mut cfg = RelayConfig::default();
    cfg.cache.default_ttl_secs = 90;
    let h = harness_with(FakeUpstream::json(StatusCode::OK, json!(1)), cfg);
    let resp = h
        .proxy
        .handle(get("/?url=https://api.example.com/", &[("x-cache-name", "k")]))
        .await;
    assert_eq!(resp.header("x-cache-ttl"), Some("90"));
}
