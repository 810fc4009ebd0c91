use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::{CacheError, KvStore};

/// Longest expiry the store will schedule; larger TTLs are clamped to it.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// In-process store with lazy TTL eviction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: DashMap<String, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every expired value. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, v| v.expires_at > now);
        before.saturating_sub(self.inner.len())
    }

    /// Periodically purge expired values so keys nobody reads again do not pile up.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(target: "relay::cache", removed, layer = "memory", "Purged expired entries");
                }
            }
        })
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        if let Some(value) = self.inner.get(key) {
            if value.expires_at > now {
                return Ok(Some(value.bytes.clone()));
            }
        }
        // Only drop it if nobody replaced it in between.
        self.inner.remove_if(key, |_, v| v.expires_at <= now);
        Ok(None)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }

        let stored = StoredValue {
            bytes: value,
            expires_at: expiry_after(Instant::now(), ttl),
        };
        self.inner.insert(key.to_string(), stored);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.remove(key);
        Ok(())
    }
}

/// `now + ttl`, clamped so a huge caller TTL can't overflow `Instant`.
fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now)
}
