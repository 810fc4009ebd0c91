use std::{sync::Arc, time::Duration};

use anyhow::Context;
use relay_cache::{CacheController, DiskStore, KvStore, MemoryStore};
use relay_config::{CacheBackend, RelayConfig};
use relay_core::Master;
use relay_proxy::{HttpUpstream, Proxy};
use tracing::{info, warn};
use utils::init_tracing;

const MEMORY_SWEEP_EVERY: Duration = Duration::from_secs(60);
const DISK_SWEEP_EVERY: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let conf_path = std::env::args().nth(1).unwrap_or_else(|| "relay.conf".into());
    let cfg = RelayConfig::from_file_or_default(&conf_path);

    init_tracing(cfg.global.log_level());
    cfg.print();

    let cache = CacheController::new(build_store(&cfg), cfg.cache.default_ttl_secs());
    let upstream = HttpUpstream::new(&cfg.http).context("building upstream HTTP client")?;
    let proxy = Proxy::new(cache, Arc::new(upstream), &cfg);

    Master::new(cfg, proxy).run().await
}

fn build_store(cfg: &RelayConfig) -> Arc<dyn KvStore> {
    match (cfg.cache.backend(), cfg.cache.cache_dir()) {
        (CacheBackend::Disk, Some(dir)) => {
            info!(target: "relay::cache", cache_dir = %dir, "Using disk cache store");
            let store = Arc::new(DiskStore::new(dir));
            let _sweeper = store.spawn_sweeper(DISK_SWEEP_EVERY);
            store
        }
        (CacheBackend::Disk, None) => {
            warn!(target: "relay::cache", "Disk backend without cache_dir; falling back to memory");
            memory_store()
        }
        (CacheBackend::Memory, _) => {
            info!(target: "relay::cache", "Using in-memory cache store");
            memory_store()
        }
    }
}

fn memory_store() -> Arc<dyn KvStore> {
    let store = Arc::new(MemoryStore::new());
    // expired entries nobody reads again
    let _sweeper = store.spawn_sweeper(MEMORY_SWEEP_EVERY);
    store
}
