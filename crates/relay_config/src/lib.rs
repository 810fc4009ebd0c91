mod cache;
mod global;
mod http;
mod relay;
mod validation;

pub use cache::{CacheBackend, CacheConfig};
pub use global::GlobalConfig;
pub use http::HttpConfig;
pub use relay::RelayConfig;
pub use validation::{validate, ConfigReport};
