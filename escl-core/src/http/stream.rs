//! The plain-vs-TLS socket dichotomy (spec.md §4.5). Grounded on the
//! teacher's `forwarder::uplink` connect path, which picks a transport
//! once per connection and then talks bytes without caring which one it
//! got. We don't need to hand the stream to a generic `AsyncRead`
//! combinator anywhere, so a small enum with inherent async methods reads
//! better here than a full `AsyncRead`/`AsyncWrite` trait impl with
//! manual pin projection.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::TransportError;

pub enum Stream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Stream {
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = match self {
            Stream::Plain(s) => s.read(buf).await,
            Stream::Tls(s) => s.read(buf).await,
        };
        n.map_err(|e| TransportError::Recv(e.to_string()))
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let r = match self {
            Stream::Plain(s) => s.write_all(buf).await,
            Stream::Tls(s) => s.write_all(buf).await,
        };
        r.map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// Builds a `rustls::ClientConfig` trusting the bundled Mozilla root
/// store (spec.md §9 Open Question: "TLS uses a default trust anchor
/// set", no device-pinning or custom-CA story, so we don't build one).
pub fn default_tls_connector() -> tokio_rustls::TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    tokio_rustls::TlsConnector::from(Arc::new(config))
}
