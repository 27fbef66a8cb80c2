use crate::route::ResolveError;
use axum::body::Body;
use axum::http::{Response, StatusCode};
use std::time::Duration;

/// Failure while handling one proxied request. Never outlives that request.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("failed to read request body: {0}")]
    InboundBody(#[source] axum::Error),
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TLS server name {0:?}")]
    ServerName(String),
    #[error("TLS handshake with {host} failed: {source}")]
    Tls {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("upstream HTTP handshake failed: {0}")]
    Handshake(#[source] hyper::Error),
    #[error("upstream request failed: {0}")]
    Request(#[source] hyper::Error),
    #[error("failed to read upstream response body: {0}")]
    ResponseBody(#[source] hyper::Error),
    #[error("failed to build upstream request: {0}")]
    Build(#[from] axum::http::Error),
    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::Resolve(_) => StatusCode::BAD_GATEWAY,
            ForwardError::InboundBody(_) => StatusCode::BAD_REQUEST,
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::Resolve(ResolveError::Unresolved { .. }) => "unresolved",
            ForwardError::Resolve(ResolveError::InvalidTarget { .. }) => "invalid_target",
            ForwardError::InboundBody(_) => "inbound_body",
            ForwardError::Timeout(_) => "timeout",
            _ => "upstream",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            ForwardError::Resolve(_) => "Cannot process request",
            ForwardError::InboundBody(_) => "Request Error",
            ForwardError::Timeout(_) => "Upstream Timeout",
            _ => "Proxy Error",
        }
    }

    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body()));
        *response.status_mut() = self.status();
        response
    }
}
