//! Stylesheet reader: rule tree, selector matching and a small cascade.
//!
//! Conditional groups (`@media`, `@supports` and friends) are kept as a
//! tree so callers can walk nested rules against a given viewport.
//! Unsupported syntax is skipped rather than rejected; a template with a
//! rule we cannot read still resolves, just without that rule.

use std::collections::HashMap;

use super::markup::{Document, Element, NodeId};
use crate::geometry::Size;

/// Root font size used to resolve `em`/`rem` lengths.
pub const ROOT_FONT_SIZE_PX: f64 = 16.0;

/// The viewport that media queries are evaluated against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaEnv {
    /// Viewport size in CSS pixels.
    pub viewport: Size,
}

impl Default for MediaEnv {
    fn default() -> Self {
        Self {
            viewport: Size::new(1024.0, 768.0),
        }
    }
}

impl MediaEnv {
    /// Environment for a viewport of the given size.
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self {
            viewport: Size::new(width, height),
        }
    }
}

/// `property: value` with its `!important` flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    /// Lowercased property name.
    pub property: String,
    /// Raw value with `!important` removed.
    pub value: String,
    /// Whether `!important` was present.
    pub important: bool,
}

/// A qualified rule: selectors plus declarations.
#[derive(Debug, Clone)]
pub struct StyleRule {
    /// Parsed selector list. Selectors we cannot match are omitted.
    pub selectors: Vec<Selector>,
    /// Declarations in source order.
    pub declarations: Vec<Declaration>,
    /// Source order across the whole sheet.
    pub order: usize,
}

/// Kind of conditional group rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// `@media`.
    Media,
    /// `@supports`.
    Supports,
    /// `@layer`, `@container` and other transparent groups.
    Other,
}

/// Node of the rule tree.
#[derive(Debug, Clone)]
pub enum CssNode {
    /// A style rule.
    Style(StyleRule),
    /// A conditional group with its own children.
    Group {
        /// What kind of group.
        kind: GroupKind,
        /// Text between the at-keyword and the block.
        prelude: String,
        /// Nested nodes.
        children: Vec<CssNode>,
    },
}

/// A parsed stylesheet.
#[derive(Debug, Clone, Default)]
pub struct Stylesheet {
    nodes: Vec<CssNode>,
}

impl Stylesheet {
    /// Parse stylesheet source. Never fails; unreadable parts are dropped.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let cleaned = strip_comments(source);
        let mut cursor = Cursor {
            src: &cleaned,
            pos: 0,
            order: 0,
        };
        Self {
            nodes: cursor.block(false),
        }
    }

    /// Top-level nodes.
    #[must_use]
    pub fn nodes(&self) -> &[CssNode] {
        &self.nodes
    }

    /// Style rules whose enclosing conditions hold in `env`, in source order.
    #[must_use]
    pub fn active_rules(&self, env: &MediaEnv) -> Vec<&StyleRule> {
        let mut out = Vec::new();
        collect_active(&self.nodes, env, &mut out);
        out
    }

    /// Cascaded declarations for `node`, including its inline `style`.
    #[must_use]
    pub fn computed_style(&self, doc: &Document, node: NodeId, env: &MediaEnv) -> ComputedStyle {
        let mut winners: HashMap<String, (Priority, String)> = HashMap::new();
        let element = doc.element(node);

        for rule in self.active_rules(env) {
            let Some(specificity) = rule
                .selectors
                .iter()
                .filter(|s| s.matches(doc, node))
                .map(Selector::specificity)
                .max()
            else {
                continue;
            };
            for decl in &rule.declarations {
                let priority = Priority {
                    important: decl.important,
                    specificity,
                    order: rule.order,
                };
                apply(&mut winners, decl, priority);
            }
        }

        if let Some(inline) = element.attr("style") {
            for decl in parse_declarations(inline) {
                let priority = Priority {
                    important: decl.important,
                    specificity: Specificity::INLINE,
                    order: usize::MAX,
                };
                apply(&mut winners, &decl, priority);
            }
        }

        ComputedStyle {
            properties: winners.into_iter().map(|(k, (_, v))| (k, v)).collect(),
        }
    }
}

/// Winning declarations for one element.
#[derive(Debug, Clone, Default)]
pub struct ComputedStyle {
    properties: HashMap<String, String>,
}

impl ComputedStyle {
    /// Value of `property`, if declared.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&str> {
        self.properties.get(property).map(String::as_str)
    }

    /// True when nothing applied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Priority {
    important: bool,
    specificity: Specificity,
    order: usize,
}

fn apply(winners: &mut HashMap<String, (Priority, String)>, decl: &Declaration, priority: Priority) {
    match winners.get(&decl.property) {
        Some((existing, _)) if *existing > priority => {}
        _ => {
            winners.insert(decl.property.clone(), (priority, decl.value.clone()));
        }
    }
}

fn collect_active<'a>(nodes: &'a [CssNode], env: &MediaEnv, out: &mut Vec<&'a StyleRule>) {
    for node in nodes {
        match node {
            CssNode::Style(rule) => out.push(rule),
            CssNode::Group {
                kind,
                prelude,
                children,
            } => {
                let active = match kind {
                    GroupKind::Media => evaluate_media(prelude, env),
                    GroupKind::Supports => evaluate_supports(prelude),
                    GroupKind::Other => true,
                };
                if active {
                    collect_active(children, env, out);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    order: usize,
}

impl Cursor<'_> {
    fn block(&mut self, nested: bool) -> Vec<CssNode> {
        let mut nodes = Vec::new();
        loop {
            self.skip_ws();
            let Some(c) = self.peek() else { break };
            if c == b'}' {
                self.pos += 1;
                if nested {
                    break;
                }
                continue;
            }
            let start = self.pos;
            let Some(stop) = self.scan_until(&[b'{', b';']) else {
                break;
            };
            let prelude = self.src[start..self.pos].trim().to_string();
            self.pos += 1;
            if stop == b';' {
                continue;
            }

            if let Some(at) = prelude.strip_prefix('@') {
                let name_end = at
                    .find(|ch: char| ch.is_whitespace() || ch == '(')
                    .unwrap_or(at.len());
                let name = at[..name_end].to_ascii_lowercase();
                let rest = at[name_end..].trim().to_string();
                let kind = match name.as_str() {
                    "media" => Some(GroupKind::Media),
                    "supports" => Some(GroupKind::Supports),
                    "layer" | "container" | "document" | "scope" => Some(GroupKind::Other),
                    _ => None,
                };
                match kind {
                    Some(kind) => {
                        let children = self.block(true);
                        nodes.push(CssNode::Group {
                            kind,
                            prelude: rest,
                            children,
                        });
                    }
                    None => self.skip_block(),
                }
                continue;
            }

            let body_start = self.pos;
            self.skip_block();
            let body_end = self.pos.saturating_sub(1).max(body_start);
            let body = &self.src[body_start..body_end];
            let selectors = parse_selector_list(&prelude);
            let order = self.order;
            self.order += 1;
            if selectors.is_empty() {
                continue;
            }
            nodes.push(CssNode::Style(StyleRule {
                selectors,
                declarations: parse_declarations(body),
                order,
            }));
        }
        nodes
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Advance to the first of `stops` outside parens and quotes.
    fn scan_until(&mut self, stops: &[u8]) -> Option<u8> {
        let bytes = self.src.as_bytes();
        let mut depth = 0usize;
        let mut quote: Option<u8> = None;
        while self.pos < bytes.len() {
            let b = bytes[self.pos];
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None => match b {
                    b'"' | b'\'' => quote = Some(b),
                    b'(' | b'[' => depth += 1,
                    b')' | b']' => depth = depth.saturating_sub(1),
                    _ if depth == 0 && stops.contains(&b) => return Some(b),
                    _ => {}
                },
            }
            self.pos += 1;
        }
        None
    }

    /// Skip past the `}` matching an already-consumed `{`.
    fn skip_block(&mut self) {
        let bytes = self.src.as_bytes();
        let mut depth = 1usize;
        let mut quote: Option<u8> = None;
        while self.pos < bytes.len() {
            let b = bytes[self.pos];
            self.pos += 1;
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None => match b {
                    b'"' | b'\'' => quote = Some(b),
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            return;
                        }
                    }
                    _ => {}
                },
            }
        }
    }
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
        out.push(' ');
    }
    out.push_str(rest);
    out
}

/// Split on `sep` outside parens, brackets and quotes.
fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                _ if c == sep && depth == 0 => {
                    parts.push(&input[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Parse a declaration block body (or an inline `style` attribute).
#[must_use]
pub fn parse_declarations(body: &str) -> Vec<Declaration> {
    split_top_level(body, ';')
        .into_iter()
        .filter_map(|chunk| {
            let (name, value) = chunk.split_once(':')?;
            let property = name.trim().to_ascii_lowercase();
            let mut value = value.trim();
            if property.is_empty() || value.is_empty() {
                return None;
            }
            let mut important = false;
            if let Some(idx) = value.to_ascii_lowercase().rfind("!important") {
                important = true;
                value = value[..idx].trim_end();
            }
            Some(Declaration {
                property,
                value: value.to_string(),
                important,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Selectors

/// Selector specificity as (ids, classes/attributes, types).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity(pub u32, pub u32, pub u32);

impl Specificity {
    /// Specificity used for inline `style` attributes.
    pub const INLINE: Self = Self(u32::MAX, 0, 0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrMatch {
    Exists(String),
    Equals(String, String),
    Includes(String, String),
    Prefix(String, String),
    Suffix(String, String),
    Substring(String, String),
}

impl AttrMatch {
    fn matches(&self, element: &Element) -> bool {
        match self {
            Self::Exists(name) => element.attr(name).is_some(),
            Self::Equals(name, v) => element.attr(name) == Some(v.as_str()),
            Self::Includes(name, v) => element
                .attr(name)
                .is_some_and(|a| a.split_whitespace().any(|w| w == v)),
            Self::Prefix(name, v) => element.attr(name).is_some_and(|a| a.starts_with(v.as_str())),
            Self::Suffix(name, v) => element.attr(name).is_some_and(|a| a.ends_with(v.as_str())),
            Self::Substring(name, v) => element.attr(name).is_some_and(|a| a.contains(v.as_str())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttrMatch>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.id.is_none() && self.classes.is_empty() && self.attributes.is_empty()
    }

    fn matches(&self, element: &Element) -> bool {
        !self.tag.as_ref().is_some_and(|t| *t != element.tag)
            && !self.id.as_ref().is_some_and(|id| element.id() != Some(id.as_str()))
            && self.classes.iter().all(|c| element.has_class(c))
            && self.attributes.iter().all(|a| a.matches(element))
    }
}

/// A complex selector made of compounds joined by descendant or child
/// combinators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    compounds: Vec<Compound>,
    combinators: Vec<Combinator>,
}

impl Selector {
    /// Parse one selector. Returns `None` for syntax we cannot match
    /// statically (pseudo-classes, sibling combinators).
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let mut compounds = Vec::new();
        let mut combinators = Vec::new();
        let mut current = Compound::default();
        let mut current_universal = false;
        let mut pending: Option<Combinator> = None;
        let chars: Vec<char> = input.trim().chars().collect();
        let mut i = 0;

        let read_ident = |i: &mut usize| -> String {
            let start = *i;
            while *i < chars.len()
                && (chars[*i].is_alphanumeric() || chars[*i] == '-' || chars[*i] == '_')
            {
                *i += 1;
            }
            chars[start..*i].iter().collect()
        };

        while i < chars.len() {
            let c = chars[i];
            if c.is_whitespace() || c == '>' {
                if c == '>' {
                    pending = Some(Combinator::Child);
                } else if pending.is_none() {
                    pending = Some(Combinator::Descendant);
                }
                i += 1;
                continue;
            }
            if c == '+' || c == '~' || c == ':' {
                return None;
            }
            if let Some(comb) = pending.take() {
                if current.is_empty() && !current_universal {
                    if comb == Combinator::Child || !compounds.is_empty() {
                        return None;
                    }
                } else {
                    compounds.push(std::mem::take(&mut current));
                    combinators.push(comb);
                    current_universal = false;
                }
            }
            match c {
                '.' => {
                    i += 1;
                    let ident = read_ident(&mut i);
                    if ident.is_empty() {
                        return None;
                    }
                    current.classes.push(ident);
                }
                '#' => {
                    i += 1;
                    let ident = read_ident(&mut i);
                    if ident.is_empty() {
                        return None;
                    }
                    current.id = Some(ident);
                }
                '*' => {
                    current_universal = true;
                    i += 1;
                }
                '[' => {
                    let close = chars[i..].iter().position(|&ch| ch == ']')? + i;
                    let inner: String = chars[i + 1..close].iter().collect();
                    current.attributes.push(parse_attr_match(&inner)?);
                    i = close + 1;
                }
                _ if c.is_alphanumeric() || c == '-' || c == '_' => {
                    current.tag = Some(read_ident(&mut i).to_ascii_lowercase());
                }
                _ => return None,
            }
        }
        if current.is_empty() && !current_universal {
            return None;
        }
        compounds.push(current);
        Some(Self {
            compounds,
            combinators,
        })
    }

    /// Specificity of this selector.
    #[must_use]
    pub fn specificity(&self) -> Specificity {
        let mut spec = Specificity::default();
        for c in &self.compounds {
            spec.0 += u32::from(c.id.is_some());
            spec.1 += u32::try_from(c.classes.len() + c.attributes.len()).unwrap_or(u32::MAX);
            spec.2 += u32::from(c.tag.is_some());
        }
        spec
    }

    /// True if the selector matches `node`.
    #[must_use]
    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        if node == Document::ROOT {
            return false;
        }
        self.match_at(doc, node, self.compounds.len() - 1)
    }

    fn match_at(&self, doc: &Document, node: NodeId, idx: usize) -> bool {
        if !self.compounds[idx].matches(doc.element(node)) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match self.combinators[idx - 1] {
            Combinator::Child => doc
                .element(node)
                .parent
                .filter(|&p| p != Document::ROOT)
                .is_some_and(|p| self.match_at(doc, p, idx - 1)),
            Combinator::Descendant => doc
                .ancestors(node)
                .into_iter()
                .any(|a| self.match_at(doc, a, idx - 1)),
        }
    }
}

fn parse_attr_match(inner: &str) -> Option<AttrMatch> {
    let ops = ["~=", "^=", "$=", "*=", "="];
    for op in ops {
        if let Some((name, value)) = inner.split_once(op) {
            let name = name.trim().to_ascii_lowercase();
            let value = value
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string();
            if name.is_empty() {
                return None;
            }
            return Some(match op {
                "~=" => AttrMatch::Includes(name, value),
                "^=" => AttrMatch::Prefix(name, value),
                "$=" => AttrMatch::Suffix(name, value),
                "*=" => AttrMatch::Substring(name, value),
                _ => AttrMatch::Equals(name, value),
            });
        }
    }
    let name = inner.trim().to_ascii_lowercase();
    (!name.is_empty()).then_some(AttrMatch::Exists(name))
}

/// Parse a comma-separated selector list, dropping members we cannot match.
#[must_use]
pub fn parse_selector_list(input: &str) -> Vec<Selector> {
    split_top_level(input, ',')
        .into_iter()
        .filter_map(Selector::parse)
        .collect()
}

// ---------------------------------------------------------------------------
// Conditions

/// Evaluate a media query list against `env`.
///
/// Supports media types (`all`, `screen`; `print` is false), `not`/`only`,
/// and width/height/orientation features in both `min-`/`max-` and range
/// form. Unknown features are false.
#[must_use]
pub fn evaluate_media(query: &str, env: &MediaEnv) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    split_top_level(query, ',')
        .into_iter()
        .any(|q| evaluate_single_media(q, env))
}

fn evaluate_single_media(query: &str, env: &MediaEnv) -> bool {
    let lowered = query.trim().to_ascii_lowercase();
    let (negate, body) = match lowered.strip_prefix("not ") {
        Some(rest) => (true, rest.trim().to_string()),
        None => (false, lowered.strip_prefix("only ").unwrap_or(&lowered).trim().to_string()),
    };
    let result = body
        .split(" and ")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .all(|part| {
            if let Some(feature) = part.strip_prefix('(').and_then(|p| p.strip_suffix(')')) {
                evaluate_feature(feature, env)
            } else {
                matches!(part, "all" | "screen")
            }
        });
    result != negate
}

fn evaluate_feature(feature: &str, env: &MediaEnv) -> bool {
    let width = env.viewport.width;
    let height = env.viewport.height;
    if let Some((name, value)) = feature.split_once(':') {
        let name = name.trim();
        let value = value.trim();
        if name == "orientation" {
            let portrait = height >= width;
            return match value {
                "portrait" => portrait,
                "landscape" => !portrait,
                _ => false,
            };
        }
        let Some(px) = parse_css_px(value) else {
            return false;
        };
        return match name {
            "min-width" => width >= px,
            "max-width" => width <= px,
            "width" => (width - px).abs() < f64::EPSILON,
            "min-height" => height >= px,
            "max-height" => height <= px,
            "height" => (height - px).abs() < f64::EPSILON,
            _ => false,
        };
    }
    for op in [">=", "<=", ">", "<"] {
        if let Some((lhs, rhs)) = feature.split_once(op) {
            let lhs = lhs.trim();
            let actual = match lhs {
                "width" => width,
                "height" => height,
                _ => return false,
            };
            let Some(px) = parse_css_px(rhs.trim()) else {
                return false;
            };
            return match op {
                ">=" => actual >= px,
                "<=" => actual <= px,
                ">" => actual > px,
                _ => actual < px,
            };
        }
    }
    false
}

/// `@supports` conditions are assumed true unless negated at the top.
fn evaluate_supports(condition: &str) -> bool {
    !condition.trim_start().to_ascii_lowercase().starts_with("not ")
}

/// Parse an absolute CSS length (`px`, `em`, `rem`, or a bare number) to px.
#[must_use]
pub fn parse_css_px(value: &str) -> Option<f64> {
    let value = value.trim();
    let (number, factor) = if let Some(n) = value.strip_suffix("px") {
        (n, 1.0)
    } else if let Some(n) = value.strip_suffix("rem") {
        (n, ROOT_FONT_SIZE_PX)
    } else if let Some(n) = value.strip_suffix("em") {
        (n, ROOT_FONT_SIZE_PX)
    } else {
        (value, 1.0)
    };
    number.trim().parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKUP: &str = r#"<div class="layout grid" id="root"><div class="panel panel1" data-slot="1" style="left: 5%"><div class="panel-inner"></div></div><section><div class="panel panel2" data-slot="2"></div></section></div>"#;

    fn doc() -> Document {
        Document::parse(MARKUP).expect("markup")
    }

    #[test]
    fn test_descendant_and_child_selectors() {
        let d = doc();
        let panel2 = 5;
        assert_eq!(d.element(panel2).attr("data-slot"), Some("2"));
        let desc = Selector::parse(".layout .panel").expect("desc");
        let child = Selector::parse(".layout > .panel").expect("child");
        assert!(desc.matches(&d, panel2));
        assert!(!child.matches(&d, panel2));
        assert!(child.matches(&d, 2));
    }

    #[test]
    fn test_attribute_selectors() {
        let d = doc();
        assert!(Selector::parse("[data-slot=\"1\"]").expect("eq").matches(&d, 2));
        assert!(Selector::parse("div[data-slot]").expect("exists").matches(&d, 5));
        assert!(Selector::parse("[class~=panel2]").expect("includes").matches(&d, 5));
        assert!(!Selector::parse("[data-slot^='2']").expect("prefix").matches(&d, 2));
    }

    #[test]
    fn test_pseudo_and_sibling_selectors_are_skipped() {
        assert!(Selector::parse(".panel:hover").is_none());
        assert!(Selector::parse(".a + .b").is_none());
        assert_eq!(parse_selector_list(".a:hover, .b").len(), 1);
    }

    #[test]
    fn test_specificity_ordering() {
        let id = Selector::parse("#root .panel").expect("id");
        let class = Selector::parse(".layout .panel1").expect("class");
        assert!(id.specificity() > class.specificity());
        assert_eq!(class.specificity(), Specificity(0, 2, 0));
    }

    #[test]
    fn test_cascade_prefers_specificity_then_order() {
        let css = ".panel { top: 1%; } .panel1 { top: 2%; } .panel { top: 3%; } .layout .panel { width: 9%; } .panel { width: 1% !important; }";
        let sheet = Stylesheet::parse(css);
        let style = sheet.computed_style(&doc(), 2, &MediaEnv::default());
        assert_eq!(style.get("top"), Some("3%"));
        assert_eq!(style.get("width"), Some("1%"));
        assert_eq!(style.get("left"), Some("5%"));
    }

    #[test]
    fn test_nested_media_and_supports() {
        let css = r"
            /* comment */
            @media screen and (min-width: 800px) {
                @supports (clip-path: polygon(0 0)) {
                    .panel2 { clip-path: polygon(0 0, 100% 0, 100% 100%); }
                }
            }
            @media (max-width: 500px) { .panel2 { height: 10px; } }
            @font-face { font-family: x; src: url(a.woff); }
            @import url('x.css');
        ";
        let sheet = Stylesheet::parse(css);
        let wide = sheet.computed_style(&doc(), 5, &MediaEnv::new(1024.0, 768.0));
        assert_eq!(wide.get("clip-path"), Some("polygon(0 0, 100% 0, 100% 100%)"));
        assert_eq!(wide.get("height"), None);
        let narrow = sheet.computed_style(&doc(), 5, &MediaEnv::new(400.0, 768.0));
        assert_eq!(narrow.get("clip-path"), None);
        assert_eq!(narrow.get("height"), Some("10px"));
    }

    #[test]
    fn test_media_features() {
        let env = MediaEnv::new(1024.0, 768.0);
        assert!(evaluate_media("(width >= 1000px)", &env));
        assert!(evaluate_media("(orientation: landscape)", &env));
        assert!(!evaluate_media("print", &env));
        assert!(evaluate_media("print, (min-width: 40em)", &env));
        assert!(evaluate_media("not print", &env));
        assert!(!evaluate_media("(hover: hover)", &env));
    }

    #[test]
    fn test_declarations_with_parens() {
        let decls = parse_declarations("clip-path: polygon(0 0; 1 1); color: red");
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].value, "polygon(0 0; 1 1)");
    }
}
