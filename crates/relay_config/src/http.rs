use serde::Deserialize;

// =======================================================
// HTTP CONFIG + DEFAULTS
// =======================================================
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen: String,

    // Timeouts (seconds)
    pub client_read_timeout_secs: u64,
    pub upstream_connect_timeout_secs: u64,
    pub upstream_timeout_secs: u64,

    // Limits (bytes)
    pub max_request_body_bytes: u64,
    pub max_upstream_response_body_bytes: u64,

    /// Adds a `details` field to 500 bodies. Off unless debugging.
    pub expose_error_details: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8787".into(),
            client_read_timeout_secs: 15,
            upstream_connect_timeout_secs: 5,
            upstream_timeout_secs: 30,
            max_request_body_bytes: 10 * 1024 * 1024,
            max_upstream_response_body_bytes: 10 * 1024 * 1024,
            expose_error_details: false,
        }
    }
}

impl HttpConfig {
    pub fn listen(&self) -> &str {
        &self.listen
    }

    pub fn client_read_timeout_secs(&self) -> u64 {
        self.client_read_timeout_secs
    }

    pub fn upstream_connect_timeout_secs(&self) -> u64 {
        self.upstream_connect_timeout_secs
    }

    pub fn upstream_timeout_secs(&self) -> u64 {
        self.upstream_timeout_secs
    }

    pub fn max_request_body_bytes(&self) -> u64 {
        self.max_request_body_bytes
    }

    pub fn max_upstream_response_body_bytes(&self) -> u64 {
        self.max_upstream_response_body_bytes
    }

    pub fn expose_error_details(&self) -> bool {
        self.expose_error_details
    }

    pub(crate) fn apply_defaults_from(&mut self, defaults: &HttpConfig) {
        if self.listen.trim().is_empty() {
            self.listen = defaults.listen.clone();
        }
        if self.max_request_body_bytes == 0 {
            self.max_request_body_bytes = defaults.max_request_body_bytes;
        }
        if self.max_upstream_response_body_bytes == 0 {
            self.max_upstream_response_body_bytes = defaults.max_upstream_response_body_bytes;
        }
    }
}
