//! The HTTP client (spec.md §4.5): DNS resolution with multi-address
//! failover, a plain or TLS connection per hop, incremental response
//! parsing, and the eSCL-device redirect policy.
//!
//! Every query runs as a task on the reactor's single-threaded runtime
//! (see [`crate::reactor`]); `HttpClient::spawn` is the only thing a
//! caller on another thread touches, mirroring the teacher's
//! `client_connector` handing work off to a worker and getting a
//! `JoinHandle`-shaped receipt back.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::{AbortHandle, JoinHandle};

use super::data::HttpData;
use super::header::HeaderList;
use super::multipart::split_multipart;
use super::query::{HttpQuery, HttpResponse, Method};
use super::stream::{default_tls_connector, Stream};
use crate::error::{HttpError, TransportError};
use crate::uri::Uri;

const MAX_REDIRECTS: u32 = 8;
const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

struct ClientInner {
    reactor_handle: tokio::runtime::Handle,
    tls_connector: tokio_rustls::TlsConnector,
    pending: Mutex<HashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
    max_redirects: u32,
}

/// A cheap-to-clone handle onto a client's reactor binding and in-flight
/// query table (spec.md §4.5: "holds... a list of in-flight queries").
/// Cloning shares the same underlying table — every clone cancels and is
/// canceled consistently.
#[derive(Clone)]
pub struct HttpClient {
    inner: std::sync::Arc<ClientInner>,
}

impl HttpClient {
    pub fn new(reactor_handle: tokio::runtime::Handle) -> Self {
        HttpClient::with_max_redirects(reactor_handle, MAX_REDIRECTS)
    }

    /// Builds a client with a deployment-chosen redirect ceiling (spec.md
    /// §4.5 "Limit: 8 hops" is a default, not a hard constant — a
    /// `DriverConfig` may want it lower against a misbehaving device).
    pub fn with_max_redirects(reactor_handle: tokio::runtime::Handle, max_redirects: u32) -> Self {
        HttpClient {
            inner: std::sync::Arc::new(ClientInner {
                reactor_handle,
                tls_connector: default_tls_connector(),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                max_redirects,
            }),
        }
    }

    /// Spawns `query` onto the reactor thread. Returns an id usable with
    /// [`HttpClient::cancel`] and a `JoinHandle` the caller awaits from
    /// any thread (spec.md §4.5: queries run cooperatively one at a time
    /// on the reactor, but completion can be observed elsewhere).
    pub fn spawn(&self, query: HttpQuery) -> (u64, JoinHandle<Result<HttpResponse, HttpError>>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let tls_connector = self.inner.tls_connector.clone();
        let max_redirects = self.inner.max_redirects;
        let inner = self.inner.clone();
        let join = self.inner.reactor_handle.spawn(async move {
            let result = run_query(query, tls_connector, max_redirects).await;
            inner.pending.lock().unwrap().remove(&id);
            result
        });
        self.inner.pending.lock().unwrap().insert(id, join.abort_handle());
        (id, join)
    }

    /// Cancels a pending query (spec.md §4.5 `cancel`). Aborting the task
    /// drops its future without resuming it, so no completion ever fires
    /// for a canceled query — spec.md's invariant falls out of Tokio's
    /// abort semantics for free.
    pub fn cancel(&self, id: u64) {
        if let Some(h) = self.inner.pending.lock().unwrap().remove(&id) {
            h.abort();
        }
    }
}

async fn run_query(
    mut query: HttpQuery,
    tls_connector: tokio_rustls::TlsConnector,
    max_redirects: u32,
) -> Result<HttpResponse, HttpError> {
    let orig_uri = query.uri.clone();
    let mut real_uri = query.uri.clone();
    let mut redirects = 0u32;

    loop {
        let addrs = resolve_addresses(&query.uri).await?;
        let mut stream = connect(&query.uri, &addrs, &tls_connector, query.timeout).await?;

        let wire = build_request_bytes(&query);
        tokio::time::timeout(query.timeout, stream.write_all(&wire))
            .await
            .map_err(|_| HttpError::Transport(TransportError::Timeout))??;

        let (status, headers, body_bytes) = tokio::time::timeout(
            query.timeout,
            read_response(&mut stream, query.no_need_response_body),
        )
        .await
        .map_err(|_| HttpError::Transport(TransportError::Timeout))??;

        if is_redirect(status) {
            if redirects >= max_redirects {
                return Err(TransportError::TooManyRedirects.into());
            }
            let Some(location) = headers.get("location") else {
                return Err(HttpError::ProtocolViolation(format!("{status} redirect with no Location")));
            };
            let next = Uri::resolve(&query.uri, location, true, false)
                .map_err(|_| HttpError::ProtocolViolation(format!("bad Location: {location}")))?;
            if let Some(cb) = query.on_redirect.as_mut() {
                cb(&query.uri, &next);
            }
            // 303 always rewrites to GET; other redirect codes keep the verb.
            if status == 303 && !matches!(query.method, Method::Get) {
                query.method = Method::Get;
                query.request_body = None;
                query.request_header = strip_entity_headers(query.request_header);
            }
            query.uri = next.clone();
            real_uri = next;
            redirects += 1;
            continue;
        }

        let raw_content_type = headers.get("content-type").map(str::to_owned);
        let body = body_bytes.map(|b| HttpData::owned(b, raw_content_type.as_deref()));
        let multipart = match (&body, raw_content_type.as_deref()) {
            (Some(b), Some(ct)) if ct.trim_start().to_ascii_lowercase().starts_with("multipart/") => {
                split_multipart(b, ct).ok()
            }
            _ => None,
        };

        return Ok(HttpResponse {
            status,
            headers,
            body,
            multipart,
            orig_uri,
            real_uri,
            user_tag: query.user_tag,
        });
    }
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

fn strip_entity_headers(headers: HeaderList) -> HeaderList {
    let mut out = HeaderList::new();
    for (name, value) in headers.iter() {
        if !name.eq_ignore_ascii_case("content-type") && !name.eq_ignore_ascii_case("content-length") {
            out.push(name, value);
        }
    }
    out
}

async fn resolve_addresses(uri: &Uri) -> Result<Vec<SocketAddr>, HttpError> {
    if let Some(addr) = uri.literal_addr(uri.effective_port()) {
        return Ok(vec![addr]);
    }
    let host_port = format!("{}:{}", uri.host(), uri.effective_port());
    tokio::net::lookup_host(host_port)
        .await
        .map(Iterator::collect)
        .map_err(|e| TransportError::Resolve(e.to_string()).into())
}

/// Tries every resolved address in order (spec.md §4.5 multi-address
/// failover) before giving up.
async fn connect(
    uri: &Uri,
    addrs: &[SocketAddr],
    tls_connector: &tokio_rustls::TlsConnector,
    timeout: Duration,
) -> Result<Stream, HttpError> {
    let mut last_err = TransportError::Connect("no addresses to try".to_owned());
    for addr in addrs {
        let tcp = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                last_err = TransportError::Connect(e.to_string());
                continue;
            }
            Err(_) => {
                last_err = TransportError::Timeout;
                continue;
            }
        };

        if uri.scheme() != "https" {
            return Ok(Stream::Plain(tcp));
        }

        let server_name = match rustls::pki_types::ServerName::try_from(uri.host().to_owned()) {
            Ok(n) => n,
            Err(e) => {
                last_err = TransportError::TlsHandshake(e.to_string());
                continue;
            }
        };
        match tokio::time::timeout(timeout, tls_connector.connect(server_name, tcp)).await {
            Ok(Ok(tls)) => return Ok(Stream::Tls(Box::new(tls))),
            Ok(Err(e)) => {
                last_err = TransportError::TlsHandshake(e.to_string());
                continue;
            }
            Err(_) => {
                last_err = TransportError::Timeout;
                continue;
            }
        }
    }
    Err(HttpError::Transport(last_err))
}

fn build_request_bytes(q: &HttpQuery) -> Vec<u8> {
    let mut target = q.uri.get_path().to_owned();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = q.uri.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut out = format!("{} {} HTTP/1.1\r\n", q.method.as_str(), target).into_bytes();
    // A caller-supplied `Host` header (e.g. the HP localhost quirk, spec.md
    // §4.6) overrides the one this client would otherwise derive from the
    // URI.
    let host_value = q
        .request_header
        .get("host")
        .map(str::to_owned)
        .unwrap_or_else(|| q.uri.host_header_value(q.force_port));
    out.extend_from_slice(format!("Host: {host_value}\r\n").as_bytes());
    out.extend_from_slice(b"Connection: close\r\n");
    for (name, value) in q.request_header.iter() {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    if let Some(body) = &q.request_body {
        out.extend_from_slice(body.bytes());
    }
    out
}

enum BodyMode {
    ContentLength(usize),
    Chunked,
    UntilClose,
}

async fn read_response(
    stream: &mut Stream,
    no_need_response_body: bool,
) -> Result<(u16, HeaderList, Option<Vec<u8>>), HttpError> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let (status, headers, header_end) = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpError::Transport(TransportError::PeerClosed));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_HEADER_BYTES {
            return Err(HttpError::ProtocolViolation("response headers too large".to_owned()));
        }
        if let Some(parsed) =
            HeaderList::parse_full_response(&buf).map_err(|e| HttpError::ProtocolViolation(e.to_string()))?
        {
            break parsed;
        }
    };

    if no_need_response_body {
        return Ok((status, headers, None));
    }

    let already_read = buf.split_off(header_end);
    let mode = body_mode(&headers)?;
    let body = match mode {
        BodyMode::ContentLength(len) => read_exact_body(stream, already_read, len).await?,
        BodyMode::Chunked => read_chunked_body(stream, already_read).await?,
        BodyMode::UntilClose => read_until_close_body(stream, already_read).await?,
    };
    Ok((status, headers, Some(body)))
}

fn body_mode(headers: &HeaderList) -> Result<BodyMode, HttpError> {
    if let Some(te) = headers.get("transfer-encoding") {
        if te.trim().eq_ignore_ascii_case("chunked") {
            return Ok(BodyMode::Chunked);
        }
        return Ok(BodyMode::UntilClose);
    }
    if let Some(cl) = headers.get("content-length") {
        let len = cl
            .trim()
            .parse::<usize>()
            .map_err(|_| HttpError::ProtocolViolation(format!("bad Content-Length: {cl}")))?;
        return Ok(BodyMode::ContentLength(len));
    }
    Ok(BodyMode::UntilClose)
}

async fn read_exact_body(stream: &mut Stream, mut body: Vec<u8>, len: usize) -> Result<Vec<u8>, HttpError> {
    if body.len() >= len {
        body.truncate(len);
        return Ok(body);
    }
    let mut chunk = [0u8; 8192];
    while body.len() < len {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpError::Transport(TransportError::PeerClosed));
        }
        let need = len - body.len();
        body.extend_from_slice(&chunk[..n.min(need)]);
    }
    Ok(body)
}

async fn read_until_close_body(stream: &mut Stream, mut body: Vec<u8>) -> Result<Vec<u8>, HttpError> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(body);
        }
        if body.len() + n > MAX_BODY_BYTES {
            return Err(HttpError::Transport(TransportError::OutOfMemory));
        }
        body.extend_from_slice(&chunk[..n]);
    }
}

async fn read_chunked_body(stream: &mut Stream, mut pending: Vec<u8>) -> Result<Vec<u8>, HttpError> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let line_end = loop {
            if let Some(pos) = find_subslice(&pending, b"\r\n") {
                break pos;
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(HttpError::Transport(TransportError::PeerClosed));
            }
            pending.extend_from_slice(&chunk[..n]);
        };

        let size_line = std::str::from_utf8(&pending[..line_end])
            .map_err(|_| HttpError::ProtocolViolation("non-utf8 chunk size line".to_owned()))?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| HttpError::ProtocolViolation(format!("bad chunk size: {size_line}")))?;
        pending.drain(..line_end + 2);

        if size == 0 {
            loop {
                if let Some(pos) = find_subslice(&pending, b"\r\n\r\n") {
                    pending.drain(..pos + 4);
                    break;
                }
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                pending.extend_from_slice(&chunk[..n]);
            }
            return Ok(out);
        }

        while pending.len() < size + 2 {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(HttpError::Transport(TransportError::PeerClosed));
            }
            pending.extend_from_slice(&chunk[..n]);
        }
        out.extend_from_slice(&pending[..size]);
        pending.drain(..size + 2);
        if out.len() > MAX_BODY_BYTES {
            return Err(HttpError::Transport(TransportError::OutOfMemory));
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::query::HttpQuery;

    #[test]
    fn build_request_bytes_includes_host_and_connection_close() {
        let uri = Uri::parse("http://scanner.local:8080/eSCL/ScannerStatus", false).unwrap();
        let query = HttpQuery::new(Method::Get, uri);
        let wire = build_request_bytes(&query);
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("GET /eSCL/ScannerStatus HTTP/1.1\r\n"));
        assert!(text.contains("Host: scanner.local:8080\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn build_request_bytes_serializes_body_with_content_length() {
        let uri = Uri::parse("http://scanner.local/eSCL/ScanJobs", false).unwrap();
        let body = HttpData::owned(br#"<scan:ScanSettings/>"#.to_vec(), Some("text/xml"));
        let query = HttpQuery::new(Method::Post, uri).with_body(body);
        let wire = build_request_bytes(&query);
        let text = String::from_utf8(wire).unwrap();
        assert!(text.contains("Content-Type: text/xml\r\n"));
        assert!(text.contains("Content-Length: 20\r\n"));
        assert!(text.ends_with("<scan:ScanSettings/>"));
    }

    #[test]
    fn caller_supplied_host_header_overrides_the_derived_one() {
        let uri = Uri::parse("http://192.168.1.50/eSCL/ScanJobs", false).unwrap();
        let query = HttpQuery::new(Method::Post, uri).with_header("Host", "localhost");
        let wire = build_request_bytes(&query);
        let text = String::from_utf8(wire).unwrap();
        assert!(text.contains("Host: localhost\r\n"));
        assert!(!text.contains("192.168.1.50"));
    }

    #[test]
    fn body_mode_prefers_chunked_over_content_length() {
        let mut h = HeaderList::new();
        h.push("Transfer-Encoding", "chunked");
        h.push("Content-Length", "10");
        assert!(matches!(body_mode(&h).unwrap(), BodyMode::Chunked));
    }

    #[test]
    fn body_mode_falls_back_to_until_close() {
        let h = HeaderList::new();
        assert!(matches!(body_mode(&h).unwrap(), BodyMode::UntilClose));
    }

    #[test]
    fn is_redirect_covers_the_five_redirect_statuses() {
        for code in [301, 302, 303, 307, 308] {
            assert!(is_redirect(code));
        }
        assert!(!is_redirect(200));
        assert!(!is_redirect(404));
    }
}
