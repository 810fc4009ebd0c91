/// What the cache layer does with one request, decided before anything else runs.
///
/// Order matters: a name with TTL 0 always invalidates, even if an entry is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDirective {
    /// No cache name: forward and never store.
    Bypass,
    /// Name + TTL 0: delete the entry and answer without forwarding.
    Invalidate { key: String },
    /// Name + TTL: serve a hit, otherwise forward and store when `ttl_secs > 0`.
    ReadThrough { key: String, ttl_secs: i64 },
}

impl CacheDirective {
    /// `requested_ttl` is the caller's value, `None` when not sent.
    pub fn decide(key: Option<&str>, requested_ttl: Option<i64>, default_ttl: i64) -> Self {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return CacheDirective::Bypass;
        };

        let ttl_secs = requested_ttl.unwrap_or(default_ttl);
        if requested_ttl == Some(0) {
            return CacheDirective::Invalidate {
                key: key.to_string(),
            };
        }

        CacheDirective::ReadThrough {
            key: key.to_string(),
            ttl_secs,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            CacheDirective::Bypass => None,
            CacheDirective::Invalidate { key } | CacheDirective::ReadThrough { key, .. } => {
                Some(key)
            }
        }
    }

    /// Whether a successful forward should be written back.
    pub fn should_store(&self) -> bool {
        matches!(self, CacheDirective::ReadThrough { ttl_secs, .. } if *ttl_secs > 0)
    }
}
