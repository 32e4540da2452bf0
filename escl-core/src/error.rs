//! Typed errors for each subsystem (spec.md §7 error taxonomy), following
//! the teacher's `thiserror`-derive convention (see `receiver::db::DbError`).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("not an http(s) URI: {0}")]
    NotHttp(String),
    #[error("malformed URI: {0}")]
    Malformed(String),
    #[error("link-local IPv6 literal host has no zone id: {0}")]
    MissingZone(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("truncated headers")]
    Truncated,
    #[error("malformed header: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MultipartError {
    #[error("missing boundary parameter on Content-Type")]
    MissingBoundary,
    #[error("no parts found for boundary {0:?}")]
    NoParts(String),
    #[error("malformed part headers")]
    MalformedPartHeaders,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XmlError {
    #[error("xml parse error: {0}")]
    Parse(String),
    #[error("missing required element: {0}")]
    MissingElement(String),
    #[error("integer overflow parsing element value")]
    IntegerOverflow,
}

/// Transport-level failure (spec.md §7 "Transport"). Carries enough to
/// decide retry-next-address vs fail-the-query.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("dns resolution failed: {0}")]
    Resolve(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("tls handshake failed: {0}")]
    TlsHandshake(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("recv failed: {0}")]
    Recv(String),
    #[error("connection closed by device")]
    PeerClosed,
    #[error("timed out")]
    Timeout,
    #[error("too many redirects")]
    TooManyRedirects,
    #[error("out of memory appending response body")]
    OutOfMemory,
}

/// Whole-query failure, distinguishing the taxonomy buckets of spec.md §7.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("job location missing or empty")]
    MissingLocation,
}

/// TIFF scanline decoder failures (spec.md §4.8). Standalone: the image
/// decoders are external collaborators of the core and don't flow through
/// [`CoreError`] — only the TIFF decoder is implemented here, as a
/// representative.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("unrecognized image format")]
    UnknownFormat,
    #[error("malformed tiff: {0}")]
    MalformedTiff(String),
    #[error("unsupported tiff compression: {0}")]
    UnsupportedCompression(u32),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("mdns browse failed: {0}")]
    Mdns(String),
    #[error("ws-discovery probe failed: {0}")]
    WsDiscovery(String),
    #[error("unknown device ident: {0}")]
    UnknownIdent(String),
}

/// Aggregate error for the host-facing operations of spec.md §6.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Uri(#[from] UriError),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}
