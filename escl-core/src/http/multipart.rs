//! Multipart body splitter (spec.md §4.2). Devices are tolerant-parser
//! territory: some emit the first boundary flush against the previous
//! byte with no leading CRLF, so the scan below does not require one.

use super::data::HttpData;
use super::header::{HeaderList, ParamList};
use crate::error::MultipartError;

/// Splits a multipart body into part descriptors that each reference the
/// parent's bytes with no copy (spec.md §3 `HttpData` parent/child
/// lifetime).
///
/// `raw_content_type` is the *unnormalized* `Content-Type` header value
/// (it must still carry the `boundary` parameter — `parent.content_type()`
/// has already had directives stripped by the time this runs).
pub fn split_multipart(parent: &HttpData, raw_content_type: &str) -> Result<Vec<HttpData>, MultipartError> {
    let params = ParamList::parse(raw_content_type);
    if !params.value().starts_with("multipart/") {
        return Err(MultipartError::MissingBoundary);
    }
    let boundary = params
        .param("boundary")
        .ok_or(MultipartError::MissingBoundary)?;

    let delimiter = format!("--{}", boundary);
    let body = parent.bytes();
    let occurrences = find_all(body, delimiter.as_bytes());
    if occurrences.len() < 2 {
        return Err(MultipartError::NoParts(boundary.to_owned()));
    }

    let mut parts = Vec::with_capacity(occurrences.len() - 1);
    for window in occurrences.windows(2) {
        let (start, next_start) = (window[0], window[1]);
        let after_delim = start + delimiter.len();
        if body[after_delim..].starts_with(b"--") {
            // Final boundary reached early; nothing more to parse.
            break;
        }
        let mut cursor = after_delim;
        if body[cursor..].starts_with(b"\r\n") {
            cursor += 2;
        }
        let header_block_end = find_all(&body[cursor..next_start], b"\r\n\r\n")
            .first()
            .map(|&o| cursor + o)
            .ok_or(MultipartError::MalformedPartHeaders)?;
        let headers = HeaderList::parse_response_headers(&body[cursor..header_block_end + 2])
            .map_err(|_| MultipartError::MalformedPartHeaders)?
            .1;
        let mut body_start = header_block_end + 4;
        let mut body_end = next_start;
        if body_start <= body_end && body[..body_end].ends_with(b"\r\n") && body_end >= body_start + 2 {
            body_end -= 2;
        }
        if body_start > body_end {
            body_start = body_end;
        }
        let content_type = headers.get("content-type");
        parts.push(parent.slice_child(body_start..body_end, content_type));
    }

    if parts.is_empty() {
        return Err(MultipartError::NoParts(boundary.to_owned()));
    }
    Ok(parts)
}

fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            out.push(i);
            i += needle.len();
        } else {
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_body(boundary: &str, parts: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (ct, data) in parts {
            out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            out.extend_from_slice(format!("Content-Type: {}\r\n\r\n", ct).as_bytes());
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        out
    }

    #[test]
    fn splits_n_parts_and_preserves_bytes() {
        let boundary = "MIME_boundary";
        let raw = build_body(
            boundary,
            &[("image/jpeg", b"jpegbytes"), ("image/jpeg", b"more-jpeg-bytes")],
        );
        let parent = HttpData::owned(raw, Some(&format!("multipart/related; boundary={}", boundary)));
        let parts = split_multipart(&parent, &format!("multipart/related; boundary={}", boundary)).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].bytes(), b"jpegbytes");
        assert_eq!(parts[1].bytes(), b"more-jpeg-bytes");
        assert_eq!(parts[0].content_type(), Some("image/jpeg"));
    }

    #[test]
    fn missing_boundary_is_an_error() {
        let parent = HttpData::owned(b"whatever".to_vec(), Some("multipart/related"));
        assert!(split_multipart(&parent, "multipart/related").is_err());
    }

    #[test]
    fn no_occurrences_of_boundary_is_an_error() {
        let parent = HttpData::owned(b"no boundary here at all".to_vec(), None);
        assert!(split_multipart(&parent, "multipart/related; boundary=zzz").is_err());
    }
}
