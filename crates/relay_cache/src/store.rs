use std::time::Duration;

use async_trait::async_trait;

use crate::CacheError;

/// Minimal key-value contract the cache relies on.
///
/// Expiry belongs to the store: once `ttl` has elapsed after a `put`, `get`
/// must stop returning the value. Callers never check expiry themselves.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}
