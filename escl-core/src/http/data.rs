//! `HttpData` — a reference-counted byte slice (spec.md §3), and the FIFO
//! queue of decoded images that sits between the device state machine and
//! the host adapter.
//!
//! `bytes::Bytes` already *is* the ref-counted, possibly-parent-sharing
//! buffer spec.md §3 describes by hand (`{content_type, bytes, size,
//! parent}`, unref the parent when the child drops, free owned bytes when
//! the last reference drops) — `Bytes::slice` shares the same underlying
//! allocation with its parent and the allocation is freed once every
//! `Bytes` clone referencing it has dropped. We just pair it with a
//! normalized content type.

use super::header::ParamList;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct HttpData {
    content_type: Option<String>,
    bytes: bytes::Bytes,
}

impl HttpData {
    pub fn owned(bytes: impl Into<bytes::Bytes>, content_type: Option<&str>) -> Self {
        HttpData {
            bytes: bytes.into(),
            content_type: content_type.map(normalize_content_type),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, raw: Option<&str>) {
        self.content_type = raw.map(normalize_content_type);
    }

    /// A child buffer referring into this buffer's bytes with no copy —
    /// used to hand out multipart parts (spec.md §4.2).
    pub fn slice_child(&self, range: std::ops::Range<usize>, content_type: Option<&str>) -> HttpData {
        HttpData {
            bytes: self.bytes.slice(range),
            content_type: content_type.map(normalize_content_type),
        }
    }
}

/// `Content-Type` normalized to lower-case and stripped of directives
/// (e.g. `Multipart/Related; boundary=x` → `multipart/related`).
fn normalize_content_type(raw: &str) -> String {
    ParamList::parse(raw).value().to_owned()
}

/// A bounded FIFO of decoded images, read by the host adapter. Not
/// thread-safe on its own (spec.md §3) — callers serialize access
/// themselves (the device actor owns it exclusively).
#[derive(Debug, Default)]
pub struct HttpDataQueue {
    items: VecDeque<HttpData>,
}

impl HttpDataQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: HttpData) {
        self.items.push_back(data);
    }

    pub fn pull(&mut self) -> Option<HttpData> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn purge(&mut self) {
        self.items.clear();
    }
}
