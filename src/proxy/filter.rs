//! Response header filtering.
//!
//! These three fields describe how the upstream framed its own body. The
//! relay re-frames the body for the client, so copying them would make the
//! client parse the new body with the old framing.

use crate::http::headers::Headers;

/// Upstream response headers never copied to the client.
pub const BLOCKED_RESPONSE_HEADERS: [&str; 3] =
    ["content-encoding", "transfer-encoding", "content-length"];

pub fn is_blocked(name: &str) -> bool {
    BLOCKED_RESPONSE_HEADERS
        .iter()
        .any(|blocked| name.eq_ignore_ascii_case(blocked))
}

/// Copies `headers` minus the blocklist, preserving order and duplicates.
pub fn filter_response_headers(headers: &Headers) -> Headers {
    headers
        .iter()
        .filter(|(name, _)| !is_blocked(name))
        .collect()
}
