//! A forgiving tag-tree reader for template markup.
//!
//! Only structure and attributes matter for layout resolution, so text
//! content is discarded. Unclosed elements are closed at end of input and
//! stray closing tags are skipped.

use std::fmt;

/// Elements that never have children.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Index of an element inside a [`Document`].
pub type NodeId = usize;

/// One element with its attributes and tree links.
#[derive(Debug, Clone)]
pub struct Element {
    /// Lowercased tag name.
    pub tag: String,
    /// Attributes in source order, names lowercased.
    pub attributes: Vec<(String, String)>,
    /// Parent element, `None` for the synthetic root.
    pub parent: Option<NodeId>,
    /// Child elements in source order.
    pub children: Vec<NodeId>,
}

impl Element {
    /// Attribute value by name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set or replace an attribute.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    /// Whitespace-separated class names.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    /// True if `class` is one of the element's classes.
    #[must_use]
    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    /// The `id` attribute.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }
}

/// Parsed markup: a flat arena of elements under a synthetic root.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Element>,
}

/// Markup that could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupError {
    /// Byte offset of the problem.
    pub offset: usize,
    /// Description.
    pub message: String,
}

impl fmt::Display for MarkupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.message, self.offset)
    }
}

impl std::error::Error for MarkupError {}

impl Document {
    /// The synthetic root node.
    pub const ROOT: NodeId = 0;

    /// Parse markup into an element tree.
    ///
    /// # Errors
    ///
    /// Returns a [`MarkupError`] for an unterminated tag, comment or
    /// attribute value.
    pub fn parse(input: &str) -> Result<Self, MarkupError> {
        let mut doc = Self {
            nodes: vec![Element {
                tag: "#root".to_string(),
                attributes: Vec::new(),
                parent: None,
                children: Vec::new(),
            }],
        };
        let mut stack: Vec<NodeId> = vec![Self::ROOT];
        let bytes = input.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] != b'<' {
                i += 1;
                continue;
            }
            let rest = &input[i..];
            if rest.starts_with("<!--") {
                let end = rest.find("-->").ok_or_else(|| MarkupError {
                    offset: i,
                    message: "unterminated comment".to_string(),
                })?;
                i += end + 3;
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                i += skip_to_gt(rest, i)?;
            } else if let Some(after) = rest.strip_prefix("</") {
                let len = skip_to_gt(rest, i)?;
                let name = after[..len - 3].trim().to_ascii_lowercase();
                if let Some(pos) = stack.iter().rposition(|&n| doc.nodes[n].tag == name) {
                    if pos > 0 {
                        stack.truncate(pos);
                    }
                }
                i += len;
            } else if rest.len() > 1 && bytes[i + 1].is_ascii_alphabetic() {
                let (tag, consumed) = parse_open_tag(rest, i)?;
                let parent = stack.last().copied().unwrap_or(Self::ROOT);
                let id = doc.nodes.len();
                let void = tag.self_closing || VOID_ELEMENTS.contains(&tag.name.as_str());
                doc.nodes.push(Element {
                    tag: tag.name,
                    attributes: tag.attributes,
                    parent: Some(parent),
                    children: Vec::new(),
                });
                doc.nodes[parent].children.push(id);
                if !void {
                    stack.push(id);
                }
                i += consumed;
            } else {
                i += 1;
            }
        }
        Ok(doc)
    }

    /// Element by id.
    ///
    /// # Panics
    ///
    /// Panics if `id` did not come from this document.
    #[must_use]
    pub fn element(&self, id: NodeId) -> &Element {
        &self.nodes[id]
    }

    /// Mutable element by id, `None` if out of range.
    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        self.nodes.get_mut(id)
    }

    /// Number of nodes including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when only the synthetic root exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Descendants of `id` in document order (excluding `id`).
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut pending: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(next) = pending.pop() {
            out.push(next);
            pending.extend(self.nodes[next].children.iter().rev().copied());
        }
        out
    }

    /// First descendant of `id` (document order) matching `pred`.
    pub fn find_descendant<F>(&self, id: NodeId, pred: F) -> Option<NodeId>
    where
        F: Fn(&Element) -> bool,
    {
        self.descendants(id)
            .into_iter()
            .find(|&n| pred(&self.nodes[n]))
    }

    /// Ancestors of `id`, nearest first, excluding the synthetic root.
    #[must_use]
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.nodes[id].parent;
        while let Some(p) = cursor {
            if p == Self::ROOT {
                break;
            }
            out.push(p);
            cursor = self.nodes[p].parent;
        }
        out
    }
}

struct OpenTag {
    name: String,
    attributes: Vec<(String, String)>,
    self_closing: bool,
}

fn skip_to_gt(rest: &str, offset: usize) -> Result<usize, MarkupError> {
    rest.find('>').map(|p| p + 1).ok_or_else(|| MarkupError {
        offset,
        message: "unterminated tag".to_string(),
    })
}

fn parse_open_tag(rest: &str, offset: usize) -> Result<(OpenTag, usize), MarkupError> {
    let bytes = rest.as_bytes();
    let unterminated = || MarkupError {
        offset,
        message: "unterminated tag".to_string(),
    };
    let mut i = 1;
    while i < bytes.len() && is_name_byte(bytes[i]) {
        i += 1;
    }
    let name = rest[1..i].to_ascii_lowercase();
    let mut attributes = Vec::new();

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match bytes.get(i) {
            None => return Err(unterminated()),
            Some(b'>') => {
                return Ok((
                    OpenTag {
                        name,
                        attributes,
                        self_closing: false,
                    },
                    i + 1,
                ))
            }
            Some(b'/') if bytes.get(i + 1) == Some(&b'>') => {
                return Ok((
                    OpenTag {
                        name,
                        attributes,
                        self_closing: true,
                    },
                    i + 2,
                ))
            }
            Some(b'/') => {
                i += 1;
                continue;
            }
            Some(_) => {}
        }

        let start = i;
        while i < bytes.len() && !matches!(bytes[i], b'=' | b'>' | b'/') && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let attr_name = rest[start..i].to_ascii_lowercase();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if bytes.get(i) == Some(&b'=') {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            match bytes.get(i) {
                Some(&q) if q == b'"' || q == b'\'' => {
                    let close = rest[i + 1..]
                        .find(char::from(q))
                        .ok_or_else(|| MarkupError {
                            offset: offset + i,
                            message: "unterminated attribute value".to_string(),
                        })?;
                    value = decode_entities(&rest[i + 1..i + 1 + close]);
                    i += close + 2;
                }
                Some(_) => {
                    let vstart = i;
                    while i < bytes.len() && bytes[i] != b'>' && !bytes[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    value = decode_entities(&rest[vstart..i]);
                }
                None => return Err(unterminated()),
            }
        }
        if !attr_name.is_empty() {
            attributes.push((attr_name, value));
        }
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b':' || b == b'_'
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_structure() {
        let doc = Document::parse(
            r#"<div class="layout a"><div class="panel panel1" data-slot="1"><div class="panel-inner"></div></div></div>"#,
        )
        .expect("parse");
        assert_eq!(doc.len(), 4);
        let layout = doc.element(1);
        assert!(layout.has_class("layout"));
        assert_eq!(doc.element(2).attr("data-slot"), Some("1"));
        assert_eq!(doc.element(3).parent, Some(2));
        assert_eq!(doc.ancestors(3), vec![2, 1]);
    }

    #[test]
    fn test_comments_void_and_self_closing() {
        let doc = Document::parse(
            "<!-- header --><div><img src='x'><polygon points=\"0 0, 1 1\"/><span></span></div>",
        )
        .expect("parse");
        let div = doc.element(1);
        assert_eq!(div.children.len(), 3);
        assert_eq!(doc.element(2).tag, "img");
        assert!(doc.element(2).children.is_empty());
        assert_eq!(doc.element(3).attr("points"), Some("0 0, 1 1"));
    }

    #[test]
    fn test_attribute_entities_and_unquoted() {
        let doc = Document::parse(r#"<a title="&quot;hi&quot;" data-x=5 hidden>"#).expect("parse");
        let a = doc.element(1);
        assert_eq!(a.attr("title"), Some("\"hi\""));
        assert_eq!(a.attr("data-x"), Some("5"));
        assert_eq!(a.attr("hidden"), Some(""));
    }

    #[test]
    fn test_unterminated_tag_errors() {
        assert!(Document::parse("<div class=\"a\"").is_err());
        assert!(Document::parse("<!-- never closed").is_err());
    }

    #[test]
    fn test_stray_closing_tag_ignored() {
        let doc = Document::parse("</span><div></p></div>").expect("parse");
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_descendants_document_order() {
        let doc = Document::parse("<a><b><c></c></b><d></d></a>").expect("parse");
        let tags: Vec<&str> = doc
            .descendants(Document::ROOT)
            .into_iter()
            .map(|n| doc.element(n).tag.as_str())
            .collect();
        assert_eq!(tags, vec!["a", "b", "c", "d"]);
    }
}
