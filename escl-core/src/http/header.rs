//! HTTP header list and the `Content-Type; boundary=...` parametrized-field
//! parser (spec.md §4.2).

use crate::error::HeaderError;

/// An ordered `(name, value)` header list. Lookup is case-insensitive on
/// `name` and returns the first match, matching spec.md §3.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    fields: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parses headers from a raw byte slice (no request/status line) using
    /// `httparse`. `httparse` requires a status or request line, so one is
    /// synthesized first, per spec.md §4.2's "feed a synthetic line"
    /// contract.
    pub fn parse_response_headers(raw: &[u8]) -> Result<(u16, HeaderList), HeaderError> {
        let mut synthetic = Vec::with_capacity(raw.len() + 32);
        synthetic.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
        synthetic.extend_from_slice(raw);

        let mut header_buf = [httparse::EMPTY_HEADER; 64];
        let mut resp = httparse::Response::new(&mut header_buf);
        match resp
            .parse(&synthetic)
            .map_err(|e| HeaderError::Malformed(e.to_string()))?
        {
            httparse::Status::Partial => Err(HeaderError::Truncated),
            httparse::Status::Complete(_) => {
                let mut list = HeaderList::new();
                for h in resp.headers.iter() {
                    list.push(h.name.to_owned(), String::from_utf8_lossy(h.value).into_owned());
                }
                Ok((resp.code.unwrap_or(200), list))
            }
        }
    }

    /// Parses a complete status line + headers off the wire. Unlike
    /// [`parse_response_headers`] this expects a real status line (it is
    /// used for the top-level response, not a multipart part). Returns the
    /// status code, the headers, and the byte offset of the blank line
    /// terminating the header block (i.e. where the body starts), or
    /// `Ok(None)` if `raw` does not yet contain a complete header block.
    pub fn parse_full_response(raw: &[u8]) -> Result<Option<(u16, HeaderList, usize)>, HeaderError> {
        let mut header_buf = [httparse::EMPTY_HEADER; 64];
        let mut resp = httparse::Response::new(&mut header_buf);
        match resp
            .parse(raw)
            .map_err(|e| HeaderError::Malformed(e.to_string()))?
        {
            httparse::Status::Partial => Ok(None),
            httparse::Status::Complete(offset) => {
                let mut list = HeaderList::new();
                for h in resp.headers.iter() {
                    list.push(h.name.to_owned(), String::from_utf8_lossy(h.value).into_owned());
                }
                Ok(Some((resp.code.ok_or(HeaderError::Truncated)?, list, offset)))
            }
        }
    }
}

/// A second header-like container keyed by parameter name, produced by
/// parsing a `Content-Type`-style field (spec.md §4.2).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamList {
    value: String,
    params: Vec<(String, String)>,
}

impl ParamList {
    /// The bare value before the first `;` (e.g. `multipart/related`),
    /// lower-cased and trimmed.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Hand-rolled state machine over tokens, quoted strings with
    /// backslash escapes, whitespace runs, and `;` separators — the same
    /// shape as spec.md §4.2 describes for a `Content-Type` field.
    pub fn parse(field: &str) -> ParamList {
        let b = field.as_bytes();
        let mut i = 0;
        while i < b.len() && b[i] != b';' {
            i += 1;
        }
        let value = field[..i].trim().to_ascii_lowercase();
        let mut params = Vec::new();

        while i < b.len() {
            debug_assert_eq!(b[i], b';');
            i += 1;
            while i < b.len() && (b[i] as char).is_whitespace() {
                i += 1;
            }
            let name_start = i;
            while i < b.len() && b[i] != b'=' && b[i] != b';' {
                i += 1;
            }
            let name = field[name_start..i].trim().to_owned();
            if i >= b.len() || b[i] != b'=' {
                // No value (or field ended) — skip to next `;`.
                while i < b.len() && b[i] != b';' {
                    i += 1;
                }
                continue;
            }
            i += 1; // past '='
            let value_str = if i < b.len() && b[i] == b'"' {
                let (v, consumed) = parse_quoted(&field[i..]);
                i += consumed;
                v
            } else {
                let start = i;
                while i < b.len() && b[i] != b';' {
                    i += 1;
                }
                field[start..i].trim().to_owned()
            };
            if !name.is_empty() {
                params.push((name, value_str));
            }
        }
        ParamList { value, params }
    }
}

/// Parses a quoted-string starting at `s[0] == '"'`, handling backslash
/// escapes. Returns the unescaped content and the number of input bytes
/// consumed (including both quotes).
fn parse_quoted(s: &str) -> (String, usize) {
    let b = s.as_bytes();
    let mut out = String::new();
    let mut i = 1;
    while i < b.len() {
        match b[i] {
            b'\\' if i + 1 < b.len() => {
                out.push(b[i + 1] as char);
                i += 2;
            }
            b'"' => {
                i += 1;
                break;
            }
            c => {
                out.push(c as char);
                i += 1;
            }
        }
    }
    (out, i)
}
