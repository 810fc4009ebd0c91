use serde::Deserialize;

// =======================================================
// CACHE CONFIG + DEFAULTS
// =======================================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Disk,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Only used by the disk backend.
    pub cache_dir: Option<String>,
    /// TTL applied when the caller sends a cache name without `x-cache-ttl`.
    pub default_ttl_secs: u64,
    /// Headers starting with this prefix are proxy directives and never go upstream.
    pub control_header_prefix: String,
    /// Collapse concurrent misses for the same cache name into one upstream fetch.
    pub coalesce_misses: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            cache_dir: None,
            default_ttl_secs: 3600,
            control_header_prefix: "x-cache-".into(),
            coalesce_misses: false,
        }
    }
}

impl CacheConfig {
    pub fn backend(&self) -> CacheBackend {
        self.backend
    }

    pub fn cache_dir(&self) -> Option<&str> {
        self.cache_dir.as_deref()
    }

    pub fn default_ttl_secs(&self) -> u64 {
        self.default_ttl_secs
    }

    pub fn control_header_prefix(&self) -> &str {
        &self.control_header_prefix
    }

    pub fn coalesce_misses(&self) -> bool {
        self.coalesce_misses
    }

    pub(crate) fn apply_defaults_from(&mut self, _defaults: &CacheConfig) {
        // Header names are compared lowercase everywhere else.
        self.control_header_prefix = self.control_header_prefix.trim().to_ascii_lowercase();

        if let Some(dir) = &self.cache_dir
            && dir.trim().is_empty()
        {
            self.cache_dir = None;
        }
    }
}
