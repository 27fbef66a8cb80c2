use crate::error::ForwardError;
use axum::http::Uri;
use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

pub type UpstreamBody = Full<Bytes>;

/// Opens one dedicated connection per forwarded request.
///
/// Connections are never pooled: each `SendRequest` handle is used for exactly
/// one exchange and dropped afterwards, which closes the socket.
#[derive(Clone)]
pub struct Connector {
    tls: TlsConnector,
}

impl Connector {
    /// TLS connector trusting the Mozilla root set.
    pub fn new() -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(roots)
    }

    pub fn with_roots(roots: rustls::RootCertStore) -> Self {
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            tls: TlsConnector::from(Arc::new(config)),
        }
    }

    /// Connect to `uri`'s authority, over TLS when the scheme is `https`.
    pub async fn connect(&self, uri: &Uri) -> Result<SendRequest<UpstreamBody>, ForwardError> {
        let host = uri.host().unwrap_or_default().to_string();
        let https = is_https(uri);
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
        let addr = format!("{host}:{port}");

        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|source| ForwardError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let _ = tcp.set_nodelay(true);

        if !https {
            return handshake(tcp).await;
        }

        let server_name = ServerName::try_from(host.clone())
            .map_err(|_| ForwardError::ServerName(host.clone()))?;
        let tls = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(|source| ForwardError::Tls { host, source })?;
        handshake(tls).await
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new()
    }
}

pub fn is_https(uri: &Uri) -> bool {
    uri.scheme_str() == Some("https")
}

/// HTTP/1.1 handshake over an established stream. The connection driver runs
/// on its own task and ends once the sender and the response body are dropped.
async fn handshake<S>(stream: S) -> Result<SendRequest<UpstreamBody>, ForwardError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(ForwardError::Handshake)?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "upstream connection closed with error");
        }
    });

    Ok(sender)
}
