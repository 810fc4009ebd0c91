use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const FALLBACK_FILTER: &str = "info,relay=debug";

/// Installs the global subscriber. `RUST_LOG` wins; otherwise `directives`
/// (usually `[global] log_level`) is used as an `EnvFilter` string.
pub fn init_tracing(directives: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(true)
                .with_thread_ids(false),
        )
        .init();
}
