use std::{future::Future, sync::Arc};

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::debug;

/// Per-key registry of fetches in progress.
///
/// The first miss for a key runs the fetch; misses arriving while it runs
/// wait on the same cell and get a clone of its result. The slot is removed
/// once resolved, so the next miss after that fetches again.
pub(super) struct InFlight<T> {
    calls: DashMap<String, Arc<OnceCell<T>>>,
}

impl<T: Clone> InFlight<T> {
    pub(super) fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    pub(super) async fn run<F, Fut>(&self, key: &str, fetch: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = self
            .calls
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if cell.initialized() {
            debug!(target: "relay::proxy", cache_key = %key, "Joining in-flight fetch");
        }

        let out = cell.get_or_init(fetch).await.clone();
        self.calls.remove_if(key, |_, c| Arc::ptr_eq(c, &cell));
        out
    }

    #[cfg(test)]
    pub(super) fn pending(&self) -> usize {
        self.calls.len()
    }
}
