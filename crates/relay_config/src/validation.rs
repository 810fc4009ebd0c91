use std::{net::SocketAddr, path::Path};

use crate::{CacheBackend, RelayConfig};

/// Validation output for a loaded relay configuration.
#[derive(Debug, Default)]
pub struct ConfigReport {
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl ConfigReport {
    /// Returns true when no errors were found.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns true when at least one error was found.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns the collected warning messages.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Returns the collected error messages.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Render warnings and errors into a readable, multi-line string.
    pub fn format(&self) -> String {
        let mut out = String::new();
        if !self.errors.is_empty() {
            out.push_str("Errors:\n");
            for err in &self.errors {
                out.push_str("  - ");
                out.push_str(err);
                out.push('\n');
            }
        }
        if !self.warnings.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("Warnings:\n");
            for warn in &self.warnings {
                out.push_str("  - ");
                out.push_str(warn);
                out.push('\n');
            }
        }
        out
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// Validate a relay configuration and return a report of issues.
pub fn validate(cfg: &RelayConfig) -> ConfigReport {
    let mut report = ConfigReport::default();

    validate_http(cfg, &mut report);
    validate_cache(cfg, &mut report);

    report
}

fn validate_http(cfg: &RelayConfig, report: &mut ConfigReport) {
    let http = &cfg.http;

    if http.listen.parse::<SocketAddr>().is_err() {
        report.error(format!(
            "http.listen '{listen}' is not a valid socket address",
            listen = http.listen
        ));
    }

    if http.client_read_timeout_secs == 0 {
        report.error("http.client_read_timeout_secs must be greater than 0");
    }

    if http.upstream_connect_timeout_secs == 0 {
        report.error("http.upstream_connect_timeout_secs must be greater than 0");
    }

    if http.upstream_timeout_secs == 0 {
        report.error("http.upstream_timeout_secs must be greater than 0");
    } else if http.upstream_connect_timeout_secs > http.upstream_timeout_secs {
        report.warn(format!(
            "http.upstream_connect_timeout_secs ({connect}) exceeds http.upstream_timeout_secs ({total}); the total timeout wins",
            connect = http.upstream_connect_timeout_secs,
            total = http.upstream_timeout_secs
        ));
    }

    if http.expose_error_details {
        report.warn("http.expose_error_details is on; 500 responses will include internal error details");
    }
}

fn validate_cache(cfg: &RelayConfig, report: &mut ConfigReport) {
    let cache = &cfg.cache;

    if cache.control_header_prefix.is_empty() {
        report.error("cache.control_header_prefix must not be empty");
    }

    if cache.default_ttl_secs == 0 {
        report.warn("cache.default_ttl_secs is 0; requests without x-cache-ttl will not be stored");
    }

    if cache.backend != CacheBackend::Disk {
        return;
    }

    let Some(cache_dir) = cache.cache_dir.as_deref() else {
        report.error("cache.backend is 'disk' but cache.cache_dir is not set");
        return;
    };

    let cache_path = Path::new(cache_dir);
    if cache_path.exists() {
        if !cache_path.is_dir() {
            report.error(format!(
                "cache.cache_dir '{cache_dir}' exists but is not a directory"
            ));
        }
    } else {
        report.warn(format!(
            "cache.cache_dir '{cache_dir}' does not exist; it will be created at runtime"
        ));
    }
}
