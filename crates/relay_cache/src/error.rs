use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache record is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}
