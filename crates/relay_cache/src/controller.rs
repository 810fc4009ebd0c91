use std::{sync::Arc, time::Duration};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, instrument, warn};

use crate::{CacheDirective, CacheEntry, CacheError, KvStore};

/// Cache decisions on top of a [`KvStore`].
///
/// The controller never looks at expiry: whatever `get` returns is live.
#[derive(Clone)]
pub struct CacheController {
    store: Arc<dyn KvStore>,
    default_ttl: i64,
}

impl CacheController {
    pub fn new(store: Arc<dyn KvStore>, default_ttl_secs: u64) -> Self {
        Self {
            store,
            default_ttl: i64::try_from(default_ttl_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn directive(&self, key: Option<&str>, requested_ttl: Option<i64>) -> CacheDirective {
        CacheDirective::decide(key, requested_ttl, self.default_ttl)
    }

    /// Fetch and decode an entry. Store failures and undecodable bytes are
    /// logged and reported as a miss so the request can still be forwarded.
    #[instrument(skip_all, fields(cache_key = %key))]
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(target: "relay::cache", "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(target: "relay::cache", error = %e, "Cache read failed; treating as miss");
                return None;
            }
        };

        match CacheEntry::from_bytes(&bytes) {
            Ok(entry) => {
                debug!(target: "relay::cache", status = entry.status_code, "Cache hit");
                Some(entry)
            }
            Err(e) => {
                warn!(
                    target: "relay::cache",
                    error = %e,
                    bytes = bytes.len(),
                    "Stored cache record is corrupt; treating as miss"
                );
                None
            }
        }
    }

    #[instrument(skip_all, fields(cache_key = %key))]
    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.store.delete(key).await?;
        debug!(target: "relay::cache", "Cache entry invalidated");
        Ok(())
    }

    /// Write a fresh entry. Returns `false` without touching the store when
    /// `ttl_secs <= 0`: entries always expire.
    #[instrument(skip_all, fields(cache_key = %key, ttl_secs = ttl_secs))]
    pub async fn store<T: Serialize>(
        &self,
        key: &str,
        payload: &T,
        status_code: u16,
        ttl_secs: i64,
    ) -> Result<bool, CacheError> {
        let Ok(ttl) = u64::try_from(ttl_secs) else {
            return Ok(false);
        };
        if ttl == 0 {
            return Ok(false);
        }

        let bytes = CacheEntry::new(payload, status_code).to_bytes()?;
        let len = bytes.len();
        self.store
            .put(key, bytes, Duration::from_secs(ttl))
            .await?;

        debug!(target: "relay::cache", ttl_secs = ttl, bytes = len, status = status_code, "Cached response");
        Ok(true)
    }
}
