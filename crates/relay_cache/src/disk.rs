//! Disk-backed store: one data file plus one metadata file per key.

use std::{
    hash::{Hash, Hasher},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::{CacheError, KvStore};

/// Temp files younger than this may still belong to a write in progress.
const TMP_GRACE: Duration = Duration::from_secs(10 * 60);

/// Contents of a `.meta` file. The key is kept so a hash collision reads
/// as a miss instead of another key's record.
#[derive(Debug, Serialize, Deserialize)]
struct DiskMeta {
    key: String,
    /// Unix seconds.
    expires_at: u64,
}

#[derive(Debug)]
pub struct DiskStore {
    dir: PathBuf,
    tmp_seq: AtomicU64,
}

impl DiskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tmp_seq: AtomicU64::new(0),
        }
    }

    /// Resolve disk paths for a value and its metadata.
    fn paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let hash = key_hash(key);
        (
            self.dir.join(format!("{hash:016x}.cache")),
            self.dir.join(format!("{hash:016x}.meta")),
        )
    }

    /// Write through a temp file + rename so readers never see a half-written value.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("tmp{}-{seq}", std::process::id()));
        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove every expired or unreadable entry, plus temp files left behind
    /// by interrupted writes. Returns how many entries were removed.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        self.purge_at(SystemTime::now()).await
    }

    async fn purge_at(&self, now: SystemTime) -> Result<usize, CacheError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now_secs = unix_secs(now);
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };

            if ext == "meta" {
                let live = match fs::read(&path).await {
                    Ok(bytes) => serde_json::from_slice::<DiskMeta>(&bytes)
                        .map(|meta| meta.expires_at > now_secs)
                        .unwrap_or(false),
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                if !live {
                    remove_if_present(&path).await?;
                    remove_if_present(&path.with_extension("cache")).await?;
                    removed += 1;
                }
            } else if ext.starts_with("tmp") {
                let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                    Ok(t) => t,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
                if age > TMP_GRACE {
                    remove_if_present(&path).await?;
                }
            }
        }

        Ok(removed)
    }

    /// Periodically purge expired entries so keys nobody reads again do not
    /// stay on disk.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => {
                        debug!(target: "relay::cache", removed, layer = "disk", "Purged expired entries");
                    }
                    Err(e) => {
                        warn!(target: "relay::cache", error = %e, layer = "disk", "Disk sweep failed");
                    }
                }
            }
        })
    }

    async fn read_meta(path: &Path) -> Result<Option<Option<DiskMeta>>, CacheError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).ok())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KvStore for DiskStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let (data_path, meta_path) = self.paths(key);

        // None: no entry. Some(None): unreadable metadata, treat as gone.
        let meta = match Self::read_meta(&meta_path).await? {
            None => return Ok(None),
            Some(Some(meta)) => meta,
            Some(None) => {
                remove_if_present(&meta_path).await?;
                remove_if_present(&data_path).await?;
                return Ok(None);
            }
        };

        if meta.key != key {
            debug!(target: "relay::cache", cache_key = %key, layer = "disk", "Slot holds another key");
            return Ok(None);
        }

        if unix_secs(SystemTime::now()) >= meta.expires_at {
            remove_if_present(&meta_path).await?;
            remove_if_present(&data_path).await?;
            debug!(target: "relay::cache", cache_key = %key, layer = "disk", "Expired entry removed");
            return Ok(None);
        }

        match fs::read(&data_path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        if ttl.as_secs() == 0 {
            return Ok(());
        }

        fs::create_dir_all(&self.dir).await?;

        let (data_path, meta_path) = self.paths(key);
        let meta = DiskMeta {
            key: key.to_string(),
            expires_at: unix_secs(SystemTime::now()).saturating_add(ttl.as_secs()),
        };

        self.write_atomic(&data_path, &value).await?;
        self.write_atomic(&meta_path, &serde_json::to_vec(&meta)?)
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let (data_path, meta_path) = self.paths(key);
        if let Some(Some(meta)) = Self::read_meta(&meta_path).await?
            && meta.key != key
        {
            return Ok(());
        }
        remove_if_present(&meta_path).await?;
        remove_if_present(&data_path).await
    }
}

async fn remove_if_present(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Hash a key to a filename.
fn key_hash(key: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
