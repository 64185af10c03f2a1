//! Parsed XML documents
//!
//! A [`Document`] is the in-memory node tree the flattener walks. Sibling order
//! is document order and every element remembers the line it starts on.

use crate::error::{MeltError, Result};
use crate::melt::types::MeltConfig;
use quick_xml::events::{BytesStart, Event};
use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use quick_xml::Reader;
use regex::bytes::Regex;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// One XML element
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub tag: String,
    /// Attributes, iterated in name order
    pub attributes: BTreeMap<String, String>,
    /// Text before the first child element, untrimmed
    pub text: Option<String>,
    pub children: Vec<Node>,
    /// 1-based line of the start tag
    pub line: usize,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Node {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn push_text(&mut self, text: &str) {
        // Text after the first child is tail text of that child and is not kept
        if !self.children.is_empty() {
            return;
        }
        self.text.get_or_insert_with(String::new).push_str(text);
    }
}

/// A parsed source document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Where the document came from, used in diagnostics
    pub source: String,
    pub root: Node,
}

impl Document {
    pub fn new(source: impl Into<String>, root: Node) -> Self {
        Document {
            source: source.into(),
            root,
        }
    }

    /// Read and parse an XML file in whatever encoding it declares
    pub fn from_path<P: AsRef<Path>>(path: P, config: &MeltConfig) -> Result<Self> {
        let path = path.as_ref();
        let source = path.display().to_string();
        let bytes = std::fs::read(path)?;
        let xml = decode_source(&bytes, &source)?;
        Self::parse(source, &xml, config)
    }

    /// Parse XML text into a node tree
    ///
    /// # Example
    /// ```rust
    /// use xmelt::melt::{Document, MeltConfig};
    ///
    /// let doc = Document::parse("inline", "<a id=\"1\"><b>x</b></a>", &MeltConfig::default()).unwrap();
    /// assert_eq!(doc.root.tag, "a");
    /// assert_eq!(doc.root.children[0].text.as_deref(), Some("x"));
    /// ```
    pub fn parse(source: impl Into<String>, xml: &str, config: &MeltConfig) -> Result<Self> {
        let source = source.into();
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut lines = LineCounter::new(xml);
        let mut stack: Vec<Node> = Vec::with_capacity(64);
        let mut root: Option<Node> = None;

        loop {
            let position = reader.buffer_position() as usize;
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    if stack.len() >= config.max_depth {
                        return Err(MeltError::xml(
                            &source,
                            position as u64,
                            format!("Maximum XML depth {} exceeded", config.max_depth),
                        ));
                    }
                    let node = open_node(e, lines.line_at(position), &source, position)?;
                    stack.push(node);
                }
                Ok(Event::Empty(ref e)) => {
                    let node = open_node(e, lines.line_at(position), &source, position)?;
                    attach(&mut stack, &mut root, node, &source, position)?;
                }
                Ok(Event::End(_)) => {
                    let node = stack.pop().ok_or_else(|| {
                        MeltError::xml(&source, position as u64, "Unexpected closing tag")
                    })?;
                    attach(&mut stack, &mut root, node, &source, position)?;
                }
                Ok(Event::Text(ref t)) => {
                    if let Some(node) = stack.last_mut() {
                        node.push_text(&String::from_utf8_lossy(t));
                    }
                }
                Ok(Event::CData(ref t)) => {
                    if let Some(node) = stack.last_mut() {
                        node.push_text(&String::from_utf8_lossy(t));
                    }
                }
                Ok(Event::GeneralRef(ref r)) => {
                    if let Some(node) = stack.last_mut() {
                        let name = String::from_utf8_lossy(r);
                        node.push_text(&resolve_reference(&name, &source));
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(MeltError::xml(&source, reader.error_position() as u64, e));
                }
                _ => {} // Comments, declarations, processing instructions
            }
        }

        if !stack.is_empty() {
            return Err(MeltError::xml(
                &source,
                xml.len() as u64,
                format!("Unclosed elements detected, final depth: {}", stack.len()),
            ));
        }

        let root = root.ok_or_else(|| MeltError::xml(&source, 0, "Document has no root element"))?;
        Ok(Document { source, root })
    }
}

static DECLARED_ENCODING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*<\?xml[^>]*?\bencoding\s*=\s*["']([A-Za-z0-9._:-]+)["']"#).unwrap());

/// Decode raw document bytes to UTF-8
///
/// A byte order mark wins, then the `encoding` of the XML declaration, then
/// UTF-8. Bytes that are invalid in the chosen encoding are an XML error.
pub fn decode_source<'a>(bytes: &'a [u8], source: &str) -> Result<Cow<'a, str>> {
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => (encoding, &bytes[bom_len..]),
        None => {
            let prolog = &bytes[..bytes.len().min(256)];
            let declared = DECLARED_ENCODING
                .captures(prolog)
                .and_then(|c| c.get(1))
                .map(|label| label.as_bytes());
            let encoding = match declared {
                Some(label) => Encoding::for_label(label).unwrap_or_else(|| {
                    warn!(source, encoding = %String::from_utf8_lossy(label), "Unknown declared encoding, reading as UTF-8");
                    UTF_8
                }),
                None => UTF_8,
            };
            (encoding, bytes)
        }
    };

    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .ok_or_else(|| MeltError::xml(source, 0, format!("content is not valid {}", encoding.name())))
}

fn open_node(e: &BytesStart, line: usize, source: &str, position: usize) -> Result<Node> {
    let mut node = Node::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    node.line = line;

    for attr in e.attributes() {
        let attr = attr.map_err(|err| MeltError::xml(source, position as u64, err))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let raw = String::from_utf8_lossy(&attr.value);
        let value = quick_xml::escape::unescape(&raw)
            .map_err(|err| MeltError::xml(source, position as u64, err))?
            .into_owned();
        node.attributes.insert(key, value);
    }

    Ok(node)
}

fn attach(
    stack: &mut [Node],
    root: &mut Option<Node>,
    node: Node,
    source: &str,
    position: usize,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => {
            return Err(MeltError::xml(
                source,
                position as u64,
                "Multiple root elements",
            ))
        }
    }
    Ok(())
}

/// Resolve `&name;` to its text; unknown entities are kept literally
fn resolve_reference(name: &str, source: &str) -> String {
    if let Some(code) = name.strip_prefix('#') {
        let parsed = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        if let Some(c) = parsed.and_then(char::from_u32) {
            return c.to_string();
        }
    } else if let Some(text) = quick_xml::escape::resolve_predefined_entity(name) {
        return text.to_string();
    }

    warn!(source, entity = name, "Unknown entity reference kept as text");
    format!("&{};", name)
}

/// Turns monotonically increasing byte offsets into 1-based line numbers
struct LineCounter<'a> {
    bytes: &'a [u8],
    offset: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(text: &'a str) -> Self {
        LineCounter {
            bytes: text.as_bytes(),
            offset: 0,
            line: 1,
        }
    }

    fn line_at(&mut self, position: usize) -> usize {
        let end = position.min(self.bytes.len());
        if end > self.offset {
            self.line += self.bytes[self.offset..end]
                .iter()
                .filter(|&&b| b == b'\n')
                .count();
            self.offset = end;
        }
        self.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Document {
        Document::parse("test.xml", xml, &MeltConfig::default()).unwrap()
    }

    #[test]
    fn test_declared_latin1_is_decoded() {
        let mut bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<a><b>caf".to_vec();
        bytes.extend_from_slice(&[0xE9]);
        bytes.extend_from_slice(b"</b></a>");

        let text = decode_source(&bytes, "latin.xml").unwrap();
        let doc = Document::parse("latin.xml", &text, &MeltConfig::default()).unwrap();
        assert_eq!(doc.root.children[0].text.as_deref(), Some("caf\u{e9}"));
    }

    #[test]
    fn test_bom_and_default_encoding() {
        let text = decode_source(b"\xEF\xBB\xBF<a/>", "bom.xml").unwrap();
        assert_eq!(text, "<a/>");
        assert_eq!(decode_source(b"<a>\xC3\xA9</a>", "utf8.xml").unwrap(), "<a>\u{e9}</a>");
    }

    #[test]
    fn test_undecodable_bytes_are_not_fatal() {
        let err = decode_source(b"<a>\xE9</a>", "bad.xml").unwrap_err();
        assert!(matches!(err, MeltError::Xml { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_nested_structure_and_lines() {
        let doc = parse("<?xml version=\"1.0\"?>\n<course id=\"9\">\n  <section id=\"1\">\n    <item>hi</item>\n  </section>\n</course>\n");

        assert_eq!(doc.root.tag, "course");
        assert_eq!(doc.root.line, 2);
        assert_eq!(doc.root.attributes.get("id").map(String::as_str), Some("9"));

        let section = &doc.root.children[0];
        assert_eq!(section.line, 3);
        assert_eq!(section.children[0].tag, "item");
        assert_eq!(section.children[0].text.as_deref(), Some("hi"));
        assert_eq!(section.children[0].line, 4);
    }

    #[test]
    fn test_entities_are_resolved() {
        let doc = parse("<a t=\"x &amp; y\"><b>1 &lt; 2 &#65;&#x42;</b></a>");
        assert_eq!(doc.root.attributes["t"], "x & y");
        assert_eq!(doc.root.children[0].text.as_deref(), Some("1 < 2 AB"));
    }

    #[test]
    fn test_cdata_is_text() {
        let doc = parse("<a><b><![CDATA[<p>hello</p>]]></b></a>");
        assert_eq!(doc.root.children[0].text.as_deref(), Some("<p>hello</p>"));
    }

    #[test]
    fn test_tail_text_is_not_node_text() {
        let doc = parse("<a>head<b>x</b>tail</a>");
        assert_eq!(doc.root.text.as_deref(), Some("head"));
    }

    #[test]
    fn test_empty_element_is_leaf() {
        let doc = parse("<a><b/><c flag=\"1\"/></a>");
        assert!(doc.root.children[0].is_leaf());
        assert_eq!(doc.root.children[0].text, None);
        assert_eq!(doc.root.children[1].attributes["flag"], "1");
    }

    #[test]
    fn test_malformed_xml_is_error() {
        let result = Document::parse("bad.xml", "<a><b></a>", &MeltConfig::default());
        assert!(matches!(result, Err(MeltError::Xml { .. })));
    }

    #[test]
    fn test_depth_limit() {
        let config = MeltConfig {
            max_depth: 2,
            ..MeltConfig::default()
        };
        let result = Document::parse("deep.xml", "<a><b><c>x</c></b></a>", &config);
        assert!(result.is_err());
    }
}
