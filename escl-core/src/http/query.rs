//! The per-request builder and the response it produces (spec.md §4.5).

use std::time::Duration;

use super::data::HttpData;
use super::header::HeaderList;
use crate::uri::Uri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// A single request, built fluently and handed to `HttpClient::execute`.
/// Redirects mutate a running copy of this during `execute`; the fields
/// here describe the *initial* request, not the final hop.
pub struct HttpQuery {
    pub(super) method: Method,
    pub(super) uri: Uri,
    pub(super) request_header: HeaderList,
    pub(super) request_body: Option<HttpData>,
    pub(super) timeout: Duration,
    pub(super) no_need_response_body: bool,
    pub(super) force_port: bool,
    pub(super) user_tag: u64,
    pub(super) on_redirect: Option<Box<dyn FnMut(&Uri, &Uri) + Send>>,
}

impl HttpQuery {
    pub fn new(method: Method, uri: Uri) -> Self {
        HttpQuery {
            method,
            uri,
            request_header: HeaderList::new(),
            request_body: None,
            timeout: Duration::from_secs(30),
            no_need_response_body: false,
            force_port: false,
            user_tag: 0,
            on_redirect: None,
        }
    }

    pub fn with_body(mut self, body: HttpData) -> Self {
        self.request_header.push("Content-Type", body.content_type().unwrap_or("application/octet-stream"));
        self.request_header.push("Content-Length", body.len().to_string());
        self.request_body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_header.push(name, value);
        self
    }

    /// Skip buffering the response body (spec.md §4.6 devcaps HEAD-style
    /// probes and cleanup DELETEs never look at it).
    pub fn no_need_response_body(mut self) -> Self {
        self.no_need_response_body = true;
        self
    }

    /// Always send an explicit port in `Host:`, even the scheme default —
    /// the EPSON quirk table entry (spec.md §4.6 quirks) needs this.
    pub fn force_port(mut self) -> Self {
        self.force_port = true;
        self
    }

    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    /// An opaque value threaded through to the response, letting a caller
    /// correlate completions without a side table (spec.md §4.5 `user_tag`).
    pub fn user_tag(mut self, tag: u64) -> Self {
        self.user_tag = tag;
        self
    }

    /// Called with `(from, to)` on every redirect hop, before the next
    /// request is sent — lets a caller rewrite or simply observe the
    /// target (spec.md §4.5 `on_redirect`).
    pub fn on_redirect(mut self, f: impl FnMut(&Uri, &Uri) + Send + 'static) -> Self {
        self.on_redirect = Some(Box::new(f));
        self
    }
}

/// The result of a completed query, including the redirect trail's
/// endpoints (spec.md §4.5 `orig_uri`/`real_uri`).
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Option<HttpData>,
    /// Present only when `Content-Type` was `multipart/*` and the split
    /// succeeded.
    pub multipart: Option<Vec<HttpData>>,
    pub orig_uri: Uri,
    pub real_uri: Uri,
    pub user_tag: u64,
}
