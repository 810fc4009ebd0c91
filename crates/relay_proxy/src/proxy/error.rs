use http::StatusCode;
use thiserror::Error;

/// Transport-level failure talking to the upstream: the exchange never
/// produced a usable status line + body.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("{0}")]
    Other(String),
}

/// Errors the proxy itself reports to the caller. Upstream 4xx/5xx are not
/// here: they are ordinary responses.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    #[error("Missing url parameter")]
    MissingUrl,

    #[error("Invalid url parameter: {0}")]
    InvalidUrl(String),

    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("upstream request to {target_url} failed: {source}")]
    Transport {
        target_url: String,
        #[source]
        source: TransportError,
    },

    #[error("upstream response from {target_url} is not valid JSON: {message}")]
    UpstreamDecode { target_url: String, message: String },

    #[error("cache store failed: {0}")]
    Store(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingUrl | ProxyError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ProxyError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::Transport { .. }
            | ProxyError::UpstreamDecode { .. }
            | ProxyError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller mistakes: reported, never logged as a fault.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Target URL for failures that happened while forwarding.
    pub fn target_url(&self) -> Option<&str> {
        match self {
            ProxyError::Transport { target_url, .. }
            | ProxyError::UpstreamDecode { target_url, .. } => Some(target_url),
            _ => None,
        }
    }

    /// Human-readable message for the caller, without the target URL.
    pub fn caller_message(&self) -> String {
        match self {
            ProxyError::Transport { source, .. } => source.to_string(),
            ProxyError::UpstreamDecode { message, .. } => {
                format!("Upstream response is not valid JSON: {message}")
            }
            other => other.to_string(),
        }
    }
}
