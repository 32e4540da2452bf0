//! XML tree builder and serializer (spec.md §4.3), used to assemble
//! `scan:ScanSettings` documents for `POST ScanJobs`.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::writer::Writer;

use crate::error::XmlError;

struct WNode {
    name: String,
    attrs: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<WNode>,
}

/// Builds a tree starting at a root element carrying a namespace-prefix
/// table declared once, on the root (spec.md §4.3 writer).
pub struct XmlWriter {
    root: WNode,
    ns_decls: Vec<(String, String)>,
    /// Path of child indices identifying the node `enter`/`add_*` target.
    cursor: Vec<usize>,
}

impl XmlWriter {
    pub fn new(root_name: impl Into<String>, ns_decls: Vec<(String, String)>) -> Self {
        XmlWriter {
            root: WNode {
                name: root_name.into(),
                attrs: Vec::new(),
                text: None,
                children: Vec::new(),
            },
            ns_decls,
            cursor: Vec::new(),
        }
    }

    fn current_mut(&mut self) -> &mut WNode {
        let mut n = &mut self.root;
        for &i in &self.cursor {
            n = &mut n.children[i];
        }
        n
    }

    pub fn add_text(&mut self, name: impl Into<String>, text: impl Into<String>, attrs: Vec<(String, String)>) {
        let node = WNode {
            name: name.into(),
            attrs,
            text: Some(text.into()),
            children: Vec::new(),
        };
        self.current_mut().children.push(node);
    }

    pub fn add_uint(&mut self, name: impl Into<String>, value: u64, attrs: Vec<(String, String)>) {
        self.add_text(name, value.to_string(), attrs);
    }

    pub fn add_bool(&mut self, name: impl Into<String>, value: bool, attrs: Vec<(String, String)>) {
        self.add_text(name, if value { "true" } else { "false" }, attrs);
    }

    /// Adds a child element with no text of its own and descends into it —
    /// subsequent `add_*`/`enter` calls target its children, until the
    /// matching [`XmlWriter::leave`].
    pub fn enter(&mut self, name: impl Into<String>, attrs: Vec<(String, String)>) {
        let idx = {
            let parent = self.current_mut();
            parent.children.push(WNode {
                name: name.into(),
                attrs,
                text: None,
                children: Vec::new(),
            });
            parent.children.len() - 1
        };
        self.cursor.push(idx);
    }

    pub fn leave(&mut self) {
        self.cursor.pop();
    }

    /// Also accepts attributes on the root element itself (e.g. the
    /// `pwg:Version` text node's siblings sit inside it, but callers
    /// sometimes need an attribute directly on `scan:ScanSettings`).
    pub fn set_root_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.root.attrs.push((name.into(), value.into()));
    }

    pub fn finish(self, indent: bool) -> Result<String, XmlError> {
        let buf: Vec<u8> = Vec::new();
        if indent {
            let mut writer = Writer::new_with_indent(buf, b' ', 2);
            write_node(&mut writer, &self.root, &self.ns_decls, true)?;
            String::from_utf8(writer.into_inner()).map_err(|e| XmlError::Parse(e.to_string()))
        } else {
            let mut writer = Writer::new(buf);
            write_node(&mut writer, &self.root, &self.ns_decls, true)?;
            String::from_utf8(writer.into_inner()).map_err(|e| XmlError::Parse(e.to_string()))
        }
    }
}

fn write_node<W: std::io::Write>(
    writer: &mut Writer<W>,
    node: &WNode,
    root_ns: &[(String, String)],
    is_root: bool,
) -> Result<(), XmlError> {
    let mut start = BytesStart::new(node.name.clone());
    if is_root {
        for (prefix, uri) in root_ns {
            start.push_attribute((format!("xmlns:{prefix}").as_str(), uri.as_str()));
        }
    }
    for (k, v) in &node.attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }

    if node.text.is_none() && node.children.is_empty() {
        writer
            .write_event(Event::Empty(start))
            .map_err(|e| XmlError::Parse(e.to_string()))?;
        return Ok(());
    }

    writer
        .write_event(Event::Start(start))
        .map_err(|e| XmlError::Parse(e.to_string()))?;
    if let Some(text) = &node.text {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(|e| XmlError::Parse(e.to_string()))?;
    }
    for child in &node.children {
        write_node(writer, child, root_ns, false)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(node.name.clone())))
        .map_err(|e| XmlError::Parse(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_scan_settings_with_nested_region_and_namespaces() {
        let mut w = XmlWriter::new(
            "scan:ScanSettings",
            vec![
                ("pwg".to_owned(), "http://www.pwg.org/schemas/2010/12/sm".to_owned()),
                ("scan".to_owned(), "http://schemas.hp.com/imaging/escl/2011/05/03".to_owned()),
            ],
        );
        w.enter("pwg:ScanRegions", vec![]);
        w.enter("pwg:ScanRegion", vec![]);
        w.add_uint("pwg:Height", 3507, vec![]);
        w.add_uint("pwg:Width", 2550, vec![]);
        w.leave();
        w.leave();
        w.add_text("pwg:InputSource", "Platen", vec![]);
        w.add_text("scan:ColorMode", "RGB24", vec![]);

        let xml = w.finish(true).unwrap();
        assert!(xml.contains(r#"xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm""#));
        assert!(xml.contains("<pwg:Height>3507</pwg:Height>"));
        assert!(xml.contains("<pwg:InputSource>Platen</pwg:InputSource>"));
        assert!(xml.starts_with("<scan:ScanSettings"));
    }

    #[test]
    fn empty_element_with_no_children_self_closes() {
        let w = XmlWriter::new("scan:Empty", vec![]);
        let xml = w.finish(false).unwrap();
        assert_eq!(xml, "<scan:Empty/>");
    }
}
