//! HTTP/HTTPS URI parsing, resolution, and the device-quirk fixups of
//! spec.md §4.1 (`fix_host`, `fix_ipv6_zone`, `fix_end_slash`).
//!
//! The source performs substring arithmetic over URI field offsets into a
//! single owned buffer; here we delegate the actual grammar to the `url`
//! crate ("the URL parser" spec.md §4.1 refers to) and layer the
//! scanner-specific fixups on top. Re-implementers in a safe language
//! should prefer a validated parser over hand-rolled offset tracking
//! (spec.md §9) — `url::Url` is that validated parser.

use crate::error::UriError;
use std::net::{IpAddr, SocketAddr, SocketAddrV6};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A parsed, owned HTTP/HTTPS URI. Cloning is a deep copy (spec.md §3).
#[derive(Debug, Clone)]
pub struct Uri {
    inner: url::Url,
    /// RFC 6874 zone id for a link-local IPv6 literal host, stored
    /// separately because `url::Url` has no notion of it.
    zone: Option<String>,
}

impl Uri {
    /// Parses an absolute `http://` or `https://` URI. Rejects every other
    /// scheme. When `strip_fragment` is set, any `#fragment` suffix is
    /// dropped.
    pub fn parse(s: &str, strip_fragment: bool) -> Result<Self, UriError> {
        let (body, zone) = split_zone(s);
        if !(body.starts_with("http://") || body.starts_with("https://")) {
            return Err(UriError::NotHttp(s.to_owned()));
        }
        let mut inner = url::Url::parse(&body).map_err(|e| UriError::Malformed(e.to_string()))?;
        if strip_fragment {
            inner.set_fragment(None);
        }
        Ok(Uri { inner, zone })
    }

    /// RFC 3986 §5.2.4 resolution of `reference` against `base`. When
    /// `path_only` is set, scheme/userinfo/host/port are always taken from
    /// `base`, regardless of what `reference` specifies — used to apply a
    /// bare path like `/eSCL/ScannerCapabilities` without letting a
    /// malicious or buggy `reference` redirect the authority.
    pub fn resolve(
        base: &Uri,
        reference: &str,
        strip_fragment: bool,
        path_only: bool,
    ) -> Result<Self, UriError> {
        if reference.is_empty() {
            let mut out = base.inner.clone();
            if strip_fragment {
                out.set_fragment(None);
            }
            return Ok(Uri {
                inner: out,
                zone: base.zone.clone(),
            });
        }

        if path_only {
            let neutral = url::Url::parse("http://escl-core.invalid/").expect("static url");
            let resolved = neutral
                .join(reference)
                .map_err(|e| UriError::Malformed(e.to_string()))?;
            let mut out = base.inner.clone();
            out.set_path(resolved.path());
            out.set_query(resolved.query());
            out.set_fragment(resolved.fragment());
            if strip_fragment {
                out.set_fragment(None);
            }
            return Ok(Uri {
                inner: out,
                zone: base.zone.clone(),
            });
        }

        let resolved = base
            .inner
            .join(reference)
            .map_err(|e| UriError::Malformed(e.to_string()))?;
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            return Err(UriError::NotHttp(resolved.to_string()));
        }
        let same_host = resolved.host_str().map(str::to_ascii_lowercase)
            == base.inner.host_str().map(str::to_ascii_lowercase);
        let mut out = resolved;
        if strip_fragment {
            out.set_fragment(None);
        }
        Ok(Uri {
            zone: if same_host { base.zone.clone() } else { None },
            inner: out,
        })
    }

    pub fn scheme(&self) -> &str {
        self.inner.scheme()
    }

    pub fn host(&self) -> &str {
        self.inner.host_str().unwrap_or_default()
    }

    /// Case-insensitive name/literal comparison against `s`.
    pub fn host_is(&self, s: &str) -> bool {
        self.host().eq_ignore_ascii_case(s)
    }

    pub fn port(&self) -> Option<u16> {
        self.inner.port()
    }

    fn default_port(&self) -> u16 {
        if self.inner.scheme() == "https" {
            443
        } else {
            80
        }
    }

    pub fn effective_port(&self) -> u16 {
        self.inner.port().unwrap_or_else(|| self.default_port())
    }

    pub fn get_path(&self) -> &str {
        self.inner.path()
    }

    pub fn set_path(&mut self, path: &str) {
        self.inner.set_path(path);
    }

    pub fn query(&self) -> Option<&str> {
        self.inner.query()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.inner.fragment()
    }

    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.inner.host(),
            Some(url::Host::Ipv4(_)) | Some(url::Host::Ipv6(_))
        )
    }

    pub fn address_family(&self) -> Option<AddressFamily> {
        match self.inner.host() {
            Some(url::Host::Ipv4(_)) => Some(AddressFamily::V4),
            Some(url::Host::Ipv6(_)) => Some(AddressFamily::V6),
            _ => None,
        }
    }

    pub fn is_loopback(&self) -> bool {
        match self.inner.host() {
            Some(url::Host::Ipv4(v4)) => IpAddr::V4(v4).is_loopback(),
            Some(url::Host::Ipv6(v6)) => IpAddr::V6(v6).is_loopback(),
            Some(url::Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
            None => false,
        }
    }

    /// If `match_host` is `None`, or the current host equals it
    /// case-insensitively, rewrites scheme+host+port from `base`. Used to
    /// undo the "redirects to localhost" device quirk (spec.md §4.6 S2).
    pub fn fix_host(&self, base: &Uri, match_host: Option<&str>) -> Self {
        let should_fix = match_host.is_none_or(|m| self.host_is(m));
        if !should_fix {
            return self.clone();
        }
        let mut out = self.inner.clone();
        let _ = out.set_scheme(base.inner.scheme());
        let _ = out.set_host(base.inner.host_str());
        let _ = out.set_port(base.inner.port());
        Uri {
            inner: out,
            zone: base.zone.clone(),
        }
    }

    /// Appends `%25<ifindex>` to a link-local IPv6 literal host lacking a
    /// zone id already. Idempotent when a zone is already present.
    pub fn fix_ipv6_zone(&self, ifindex: u32) -> Self {
        if self.zone.is_some() {
            return self.clone();
        }
        match self.inner.host() {
            Some(url::Host::Ipv6(addr)) if is_link_local_v6(&addr) => Uri {
                inner: self.inner.clone(),
                zone: Some(ifindex.to_string()),
            },
            _ => self.clone(),
        }
    }

    /// Inverse of [`Uri::fix_ipv6_zone`].
    pub fn strip_zone_suffix(&self) -> Self {
        Uri {
            inner: self.inner.clone(),
            zone: None,
        }
    }

    /// Ensures the path ends with `/`.
    pub fn fix_end_slash(&self) -> Self {
        if self.inner.path().ends_with('/') {
            return self.clone();
        }
        let mut out = self.inner.clone();
        let with_slash = format!("{}/", out.path());
        out.set_path(&with_slash);
        Uri {
            inner: out,
            zone: self.zone.clone(),
        }
    }

    /// A precomputed socket address when the host literal parses as IPv4
    /// or IPv6; `None` for a name that still needs DNS resolution.
    pub fn literal_addr(&self, default_port: u16) -> Option<SocketAddr> {
        let port = self.inner.port().unwrap_or(default_port);
        match self.inner.host()? {
            url::Host::Ipv4(v4) => Some(SocketAddr::new(IpAddr::V4(v4), port)),
            url::Host::Ipv6(v6) => {
                let scope_id = self
                    .zone
                    .as_deref()
                    .and_then(|z| z.parse::<u32>().ok())
                    .unwrap_or(0);
                Some(SocketAddr::V6(SocketAddrV6::new(v6, port, 0, scope_id)))
            }
            url::Host::Domain(_) => None,
        }
    }

    /// The `Host:` header value per spec.md §4.5 "Host header rule": a
    /// literal host becomes `addr[:port]` with the zone preserved and the
    /// scheme-default port elided; a named host becomes `name[:port]`.
    /// `force_port` (the per-query `force_port` flag, e.g. the EPSON
    /// quirk) always appends the port even when it matches the scheme
    /// default.
    pub fn host_header_value(&self, force_port: bool) -> String {
        let default_port = self.default_port();
        let port = self.inner.port().unwrap_or(default_port);
        let include_port = force_port || port != default_port;
        match self.inner.host() {
            Some(url::Host::Ipv6(v6)) => {
                let mut s = format!("[{}", v6);
                if let Some(z) = &self.zone {
                    s.push_str("%25");
                    s.push_str(z);
                }
                s.push(']');
                if include_port {
                    s.push(':');
                    s.push_str(&port.to_string());
                }
                s
            }
            _ => {
                if include_port {
                    format!("{}:{}", self.host(), port)
                } else {
                    self.host().to_owned()
                }
            }
        }
    }
}

impl std::fmt::Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.zone, self.inner.host()) {
            (Some(zone), Some(url::Host::Ipv6(addr))) => {
                write!(f, "{}://", self.inner.scheme())?;
                write!(f, "[{}%25{}]", addr, zone)?;
                if let Some(port) = self.inner.port() {
                    write!(f, ":{}", port)?;
                }
                write!(f, "{}", self.inner.path())?;
                if let Some(q) = self.inner.query() {
                    write!(f, "?{}", q)?;
                }
                if let Some(frag) = self.inner.fragment() {
                    write!(f, "#{}", frag)?;
                }
                Ok(())
            }
            _ => write!(f, "{}", self.inner),
        }
    }
}

impl PartialEq for Uri {
    fn eq(&self, other: &Self) -> bool {
        self.inner.scheme() == other.inner.scheme()
            && self.host().eq_ignore_ascii_case(other.host())
            && self.effective_port() == other.effective_port()
            && self.inner.path() == other.inner.path()
            && self.inner.query() == other.inner.query()
            && self.inner.fragment() == other.inner.fragment()
            && self.inner.username() == other.inner.username()
            && self.inner.password() == other.inner.password()
    }
}
impl Eq for Uri {}

fn is_link_local_v6(addr: &std::net::Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// Strips an embedded RFC 6874 zone id (`%eth0` or `%25eth0`) from inside
/// the bracketed host of a URI string, returning the zone-less string plus
/// the extracted zone. `url::Url::parse` rejects `%` inside a host
/// literal, so this must run before delegating.
fn split_zone(s: &str) -> (String, Option<String>) {
    let Some(start) = s.find('[') else {
        return (s.to_owned(), None);
    };
    let Some(rel_end) = s[start..].find(']') else {
        return (s.to_owned(), None);
    };
    let end = start + rel_end;
    let inside = &s[start + 1..end];
    let Some(pct) = inside.find('%') else {
        return (s.to_owned(), None);
    };
    let (addr_part, zone_part) = inside.split_at(pct);
    let zone_part = &zone_part[1..];
    let zone = zone_part.strip_prefix("25").unwrap_or(zone_part);
    let mut out = String::with_capacity(s.len());
    out.push_str(&s[..start + 1]);
    out.push_str(addr_part);
    out.push_str(&s[end..]);
    (out, Some(zone.to_owned()))
}
