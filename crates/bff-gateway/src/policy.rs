use axum::http::{Method, StatusCode};

/// Route segment whose reads are cached.
pub const CACHED_SEGMENT: &str = "product";

/// Whether an exchange may be served from or stored into the response cache.
///
/// Checked twice per request: before forwarding without a status (should the
/// cache be consulted at all) and after the upstream answered with its status
/// (should the response be stored).
pub fn is_cacheable(method: &Method, segment: &str, status: Option<StatusCode>) -> bool {
    *method == Method::GET
        && segment == CACHED_SEGMENT
        && status.map_or(true, |s| s == StatusCode::OK)
}

/// Methods whose inbound body is forwarded upstream.
pub fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}
