use std::collections::HashSet;

use http::{header, HeaderMap, HeaderName};

/// =======================================================
/// CONTROL HEADERS (proxy directives)
/// =======================================================
///
/// Every header starting with `prefix` talks to the proxy, not to the
/// upstream. Two of them carry meaning:
/// - `<prefix>name`: cache name
/// - `<prefix>ttl`:  TTL in seconds, `0` = invalidate
#[derive(Debug, Clone)]
pub struct ControlHeaders {
    prefix: String,
    name: HeaderName,
    ttl: HeaderName,
}

impl ControlHeaders {
    /// Returns `None` when the prefix can't form valid header names.
    pub fn new(prefix: &str) -> Option<Self> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.is_empty() {
            return None;
        }
        let name = HeaderName::from_bytes(format!("{prefix}name").as_bytes()).ok()?;
        let ttl = HeaderName::from_bytes(format!("{prefix}ttl").as_bytes()).ok()?;
        Some(Self { prefix, name, ttl })
    }

    pub fn name_header(&self) -> &HeaderName {
        &self.name
    }

    pub fn ttl_header(&self) -> &HeaderName {
        &self.ttl
    }

    pub fn is_control(&self, name: &HeaderName) -> bool {
        // HeaderName is always lowercase.
        name.as_str().starts_with(&self.prefix)
    }
}

impl Default for ControlHeaders {
    fn default() -> Self {
        Self {
            prefix: "x-cache-".to_string(),
            name: HeaderName::from_static("x-cache-name"),
            ttl: HeaderName::from_static("x-cache-ttl"),
        }
    }
}

/// Hop-by-hop headers plus the ones the client rebuilds for the new connection.
const CONNECTION_MANAGED: [HeaderName; 9] = [
    header::HOST,
    header::CONTENT_LENGTH,
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// =======================================================
/// HEADER FILTER (inbound -> upstream)
/// =======================================================
///
/// Rules:
/// - Drop proxy control headers (`x-cache-*` by default)
/// - Drop hop-by-hop headers and anything named in `Connection`
/// - Drop Host / Content-Length (the client sets them for the target)
/// - Everything else goes through untouched, repeated values included
pub fn filter_forward_headers(inbound: &HeaderMap, control: &ControlHeaders) -> HeaderMap {
    let connection_tokens = collect_connection_tokens(inbound);
    let mut out = HeaderMap::with_capacity(inbound.len());

    for (name, value) in inbound.iter() {
        if control.is_control(name) {
            continue;
        }
        if CONNECTION_MANAGED.contains(name) {
            continue;
        }
        if connection_tokens.contains(name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    out
}

fn collect_connection_tokens(headers: &HeaderMap) -> HashSet<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(split_header_tokens)
        .collect()
}

fn split_header_tokens(value: &str) -> impl Iterator<Item = String> + '_ {
    value.split(',').filter_map(|token| {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(
                trimmed
                    .trim_matches(|c| c == '"' || c == '\'')
                    .to_ascii_lowercase(),
            )
        }
    })
}
