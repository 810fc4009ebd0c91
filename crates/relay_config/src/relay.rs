use serde::Deserialize;

use crate::validation::{validate, ConfigReport};
use crate::{CacheConfig, GlobalConfig, HttpConfig};

// =======================================================
// RELAY CONFIG (main config)
// =======================================================
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl RelayConfig {
    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn http(&self) -> &HttpConfig {
        &self.http
    }

    pub fn cache(&self) -> &CacheConfig {
        &self.cache
    }

    /// Validate the configuration and return a report of warnings and errors.
    pub fn validate(&self) -> ConfigReport {
        validate(self)
    }

    pub fn from_file(file_name: &str) -> Result<Self, config::ConfigError> {
        let built = config::Config::builder()
            .add_source(config::File::new(file_name, config::FileFormat::Ini).required(false))
            .build()?;

        Self::finish(built)
    }

    /// Parse INI text directly (no file involved).
    pub fn from_ini_str(raw: &str) -> Result<Self, config::ConfigError> {
        let built = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Ini))
            .build()?;

        Self::finish(built)
    }

    fn finish(built: config::Config) -> Result<Self, config::ConfigError> {
        let mut cfg: RelayConfig = built.try_deserialize()?;
        cfg.apply_defaults();
        Ok(cfg)
    }

    pub fn from_file_or_default(file_name: &str) -> Self {
        match Self::from_file(file_name) {
            Ok(cfg) => {
                let report = cfg.validate();
                if report.has_errors() {
                    eprintln!("⚠️  Invalid config in '{file_name}':");
                    eprintln!("{}", report.format());
                    eprintln!("➡️  Using default config (in-memory)...");
                    RelayConfig::default()
                } else {
                    if !report.warnings().is_empty() {
                        eprintln!("⚠️  Config warnings in '{file_name}':");
                        eprintln!("{}", report.format());
                    }
                    cfg
                }
            }
            Err(e) => {
                eprintln!("⚠️  Error reading config '{file_name}': {e}");
                eprintln!("➡️  Using default config (in-memory)...");
                RelayConfig::default()
            }
        }
    }

    fn apply_defaults(&mut self) {
        let def_global = GlobalConfig::default();
        self.global.apply_defaults_from(&def_global);

        let def_http = HttpConfig::default();
        self.http.apply_defaults_from(&def_http);

        let def_cache = CacheConfig::default();
        self.cache.apply_defaults_from(&def_cache);
    }

    pub fn print(&self) {
        println!("================ RELAY CONFIG ================");
        self.print_global();
        self.print_http();
        self.print_cache();
        println!("==============================================");
    }

    fn print_global(&self) {
        println!("\n[global]");
        println!("  max_connections      = {}", self.global.max_connections);
        println!("  log_level            = {}", self.global.log_level);
    }

    fn print_http(&self) {
        println!("\n[http]");
        println!("  listen               = {}", self.http.listen);
        println!(
            "  client_read_timeout_secs = {}",
            self.http.client_read_timeout_secs
        );
        println!(
            "  upstream_connect_timeout_secs = {}",
            self.http.upstream_connect_timeout_secs
        );
        println!(
            "  upstream_timeout_secs = {}",
            self.http.upstream_timeout_secs
        );
        println!(
            "  max_request_body_bytes = {}",
            self.http.max_request_body_bytes
        );
        println!(
            "  max_upstream_response_body_bytes = {}",
            self.http.max_upstream_response_body_bytes
        );
        println!(
            "  expose_error_details = {}",
            self.http.expose_error_details
        );
    }

    fn print_cache(&self) {
        println!("\n[cache]");
        println!("  backend              = {:?}", self.cache.backend);
        println!("  cache_dir            = {:?}", self.cache.cache_dir);
        println!("  default_ttl_secs     = {}", self.cache.default_ttl_secs);
        println!(
            "  control_header_prefix = {}",
            self.cache.control_header_prefix
        );
        println!("  coalesce_misses      = {}", self.cache.coalesce_misses);
    }
}
