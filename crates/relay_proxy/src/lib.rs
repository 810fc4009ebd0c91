//! Forwarding engine: turns one inbound call into at most one upstream call,
//! with the named cache consulted before and written after.

mod proxy;

pub use proxy::error::{ProxyError, TransportError};
pub use proxy::headers::{filter_forward_headers, ControlHeaders};
pub use proxy::request::{parse_target_url, target_url_from_query, ProxyRequest};
pub use proxy::response::{ProxyOutcome, ProxyResponse};
pub use proxy::upstream::{HttpUpstream, OutboundRequest, Upstream, UpstreamReply};
pub use proxy::Proxy;
