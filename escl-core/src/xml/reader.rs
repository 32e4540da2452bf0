//! Namespace-aware XML reader (spec.md §4.3).
//!
//! The capability and status documents this driver parses are a few
//! kilobytes at most, so unlike the source's token-at-a-time cursor over a
//! live parser, this reader parses once into a small tree with `quick-xml`
//! and then exposes the same `next`/`enter`/`leave`/`depth`/`end` cursor
//! over that tree. Streaming's low-memory benefit buys nothing at this
//! size, and a tree makes `enter`/`leave` trivially correct to get right
//! without a compiler backstop.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

use crate::error::XmlError;

/// One `(prefix, pattern)` substitution rule: when an element's resolved
/// namespace URI matches `pattern` (glob, a single trailing `*` is the
/// only wildcard shape eSCL/WSD namespaces need), the reader reports that
/// element under `prefix` regardless of the prefix the document used.
#[derive(Debug, Clone)]
pub struct NsRule {
    pub prefix: String,
    pub pattern: String,
}

impl NsRule {
    pub fn new(prefix: impl Into<String>, pattern: impl Into<String>) -> Self {
        NsRule {
            prefix: prefix.into(),
            pattern: pattern.into(),
        }
    }
}

fn glob_match(pattern: &str, s: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => s.starts_with(prefix),
        None => pattern == s,
    }
}

#[derive(Default, Clone)]
struct Scope {
    default_ns: Option<String>,
    prefixes: HashMap<String, String>,
}

struct Node {
    label: String,
    text: String,
    children: Vec<Node>,
}

/// A parsed document plus a cursor position into it.
pub struct XmlReader {
    root: Node,
    /// Child index at each depth from the root down to the current node;
    /// empty means the cursor is on the root itself.
    path: Vec<usize>,
    ended: bool,
}

impl XmlReader {
    pub fn parse(buf: &[u8], rules: &[NsRule]) -> Result<Self, XmlError> {
        let root = parse_tree(buf, rules)?;
        Ok(XmlReader {
            root,
            path: Vec::new(),
            ended: false,
        })
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn end(&self) -> bool {
        self.ended
    }

    pub fn name(&self) -> &str {
        &self.node_at(&self.path).label
    }

    pub fn value(&self) -> &str {
        &self.node_at(&self.path).text
    }

    pub fn value_uint(&self) -> Result<u64, XmlError> {
        self.value().trim().parse().map_err(|_| XmlError::IntegerOverflow)
    }

    pub fn name_match(&self, pattern: &str) -> bool {
        glob_match(pattern, self.name())
    }

    pub fn path(&self) -> String {
        let mut labels = vec![self.root.label.as_str()];
        let mut n = &self.root;
        for &i in &self.path {
            n = &n.children[i];
            labels.push(n.label.as_str());
        }
        labels.join("/")
    }

    fn node_at(&self, path: &[usize]) -> &Node {
        let mut n = &self.root;
        for &i in path {
            n = &n.children[i];
        }
        n
    }

    /// Moves to the next sibling of the current node. Leaves the cursor in
    /// place and sets `end()` when there is none.
    pub fn next(&mut self) -> bool {
        if self.path.is_empty() {
            self.ended = true;
            return false;
        }
        let parent_len = self.node_at(&self.path[..self.path.len() - 1]).children.len();
        let last = self.path.len() - 1;
        let next_idx = self.path[last] + 1;
        if next_idx < parent_len {
            self.path[last] = next_idx;
            self.ended = false;
            true
        } else {
            self.ended = true;
            false
        }
    }

    /// Descends into the current node's first child.
    pub fn enter(&mut self) -> bool {
        if self.node_at(&self.path).children.is_empty() {
            self.ended = true;
            false
        } else {
            self.path.push(0);
            self.ended = false;
            true
        }
    }

    /// Returns the cursor to the parent, restoring it to its position at
    /// the matching `enter()` (spec.md §8 invariant 8).
    pub fn leave(&mut self) {
        self.path.pop();
        self.ended = false;
    }

    /// Pre-order walk that never ascends above `min_depth`: enters
    /// children when present, otherwise advances to the next sibling,
    /// otherwise leaves upward until a sibling is found or `min_depth` is
    /// reached.
    pub fn deep_next(&mut self, min_depth: usize) -> bool {
        if self.enter() {
            return true;
        }
        loop {
            if self.next() {
                return true;
            }
            if self.depth() <= min_depth {
                self.ended = true;
                return false;
            }
            self.leave();
        }
    }
}

fn parse_tree(buf: &[u8], rules: &[NsRule]) -> Result<Node, XmlError> {
    let mut reader = Reader::from_reader(buf);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<(Node, Scope)> = Vec::new();
    let mut root: Option<Node> = None;
    let mut evbuf = Vec::new();

    loop {
        evbuf.clear();
        match reader
            .read_event_into(&mut evbuf)
            .map_err(|e| XmlError::Parse(e.to_string()))?
        {
            Event::Start(tag) => {
                let parent_scope = stack.last().map(|(_, s)| s.clone()).unwrap_or_default();
                let (label, scope) = resolve_tag(&tag, parent_scope, rules)?;
                stack.push((
                    Node {
                        label,
                        text: String::new(),
                        children: Vec::new(),
                    },
                    scope,
                ));
            }
            Event::Empty(tag) => {
                let parent_scope = stack.last().map(|(_, s)| s.clone()).unwrap_or_default();
                let (label, scope) = resolve_tag(&tag, parent_scope, rules)?;
                let node = Node {
                    label,
                    text: String::new(),
                    children: Vec::new(),
                };
                let _ = scope;
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                let (node, _) = stack.pop().ok_or_else(|| XmlError::Parse("unmatched closing tag".to_owned()))?;
                attach(&mut stack, &mut root, node);
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| XmlError::Parse(e.to_string()))?;
                if let Some((node, _)) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(t.as_ref()).into_owned();
                if let Some((node, _)) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| XmlError::MissingElement("document root".to_owned()))
}

fn attach(stack: &mut Vec<(Node, Scope)>, root: &mut Option<Node>, node: Node) {
    if let Some((parent, _)) = stack.last_mut() {
        parent.children.push(node);
    } else {
        *root = Some(node);
    }
}

fn resolve_tag(tag: &BytesStart, mut scope: Scope, rules: &[NsRule]) -> Result<(String, Scope), XmlError> {
    for attr in tag.attributes() {
        let attr = attr.map_err(|e| XmlError::Parse(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key == "xmlns" {
            scope.default_ns = Some(
                attr.unescape_value()
                    .map_err(|e| XmlError::Parse(e.to_string()))?
                    .into_owned(),
            );
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.prefixes.insert(
                prefix.to_owned(),
                attr.unescape_value()
                    .map_err(|e| XmlError::Parse(e.to_string()))?
                    .into_owned(),
            );
        }
    }

    let raw_name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
    let (raw_prefix, local) = match raw_name.split_once(':') {
        Some((p, l)) => (Some(p.to_owned()), l.to_owned()),
        None => (None, raw_name),
    };
    let resolved_ns = match &raw_prefix {
        Some(p) => scope.prefixes.get(p).cloned(),
        None => scope.default_ns.clone(),
    };
    let label = resolved_ns
        .as_deref()
        .and_then(|uri| rules.iter().find(|r| glob_match(&r.pattern, uri)))
        .map(|r| format!("{}:{}", r.prefix, local))
        .unwrap_or_else(|| match &raw_prefix {
            Some(p) => format!("{p}:{local}"),
            None => local.clone(),
        });
    Ok((label, scope))
}
