//! Email markup as an editable element tree.
//!
//! Parsing goes through `scraper` (html5ever), so unbalanced markup is
//! recovered the way browsers recover it. Markup carrying a doctype or an
//! `html`/`head`/`body` tag parses as a full document; anything else parses
//! as a body fragment and serializes back without a document shell.
//!
//! The parsed tree is copied into owned nodes for editing. Serialization
//! escapes text and attribute values the same way html5ever does, so an
//! unedited tree re-parses to itself.

use std::fmt::{self, Write as _};
use std::sync::LazyLock;

use regex_lite::Regex;
use scraper::{ElementRef, Html};

static DOCUMENT_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:!doctype|html|head|body)[\s>/]").expect("document markup regex")
});

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

/// Elements whose text content is serialized without escaping.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "iframe", "noembed", "noframes", "noscript", "plaintext", "script", "style", "xmp",
];

#[must_use]
pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

/// How markup was parsed, and so how it serializes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Markup {
    #[default]
    Fragment,
    Document,
}

impl Markup {
    #[must_use]
    pub fn detect(markup: &str) -> Self {
        if DOCUMENT_MARKUP.is_match(markup) {
            Self::Document
        } else {
            Self::Fragment
        }
    }
}

// ── Tree ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Lowercased.
    pub name: String,
    /// Decoded value; empty for bare boolean attributes.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Lowercased tag name.
    pub name: String,
    /// Sorted by name when parsed; edits append.
    pub attrs: Vec<Attribute>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
    /// Doctype name, e.g. `html`.
    Doctype(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub nodes: Vec<Node>,
    pub kind: Markup,
}

impl Element {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
            .map(|attr| attr.value.as_str())
    }

    /// Replace the value in place, or append a new attribute.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attrs
            .iter_mut()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
        {
            Some(attr) => attr.value = value,
            None => self.attrs.push(Attribute {
                name: name.to_ascii_lowercase(),
                value,
            }),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self
            .attrs
            .iter()
            .position(|attr| attr.name.eq_ignore_ascii_case(name))?;
        Some(self.attrs.remove(index).value)
    }

    /// Concatenated text of direct text children.
    #[must_use]
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![Node::Text(text.into())];
    }

    fn is_raw_text(&self) -> bool {
        RAW_TEXT_ELEMENTS.contains(&self.name.as_str())
    }
}

fn visit_nodes<'a>(
    nodes: &'a [Node],
    ancestors: &mut Vec<&'a Element>,
    visit: &mut impl FnMut(&'a Element, &[&'a Element]),
) {
    for node in nodes {
        if let Node::Element(element) = node {
            visit(element, ancestors.as_slice());
            ancestors.push(element);
            visit_nodes(&element.children, ancestors, visit);
            ancestors.pop();
        }
    }
}

fn visit_nodes_mut(nodes: &mut [Node], visit: &mut impl FnMut(&mut Element)) {
    for node in nodes {
        if let Node::Element(element) = node {
            visit(element);
            visit_nodes_mut(&mut element.children, visit);
        }
    }
}

fn retain_nodes(nodes: &mut Vec<Node>, edit: &mut impl FnMut(&mut Element) -> bool) {
    nodes.retain_mut(|node| match node {
        Node::Element(element) => {
            let keep = edit(element);
            if keep {
                retain_nodes(&mut element.children, edit);
            }
            keep
        }
        _ => true,
    });
}

fn remove_nodes(
    nodes: &mut Vec<Node>,
    matches: &mut impl FnMut(&Element) -> bool,
    removed: &mut Vec<Element>,
) {
    let mut kept = Vec::with_capacity(nodes.len());
    for node in nodes.drain(..) {
        match node {
            Node::Element(element) if matches(&element) => removed.push(element),
            Node::Element(mut element) => {
                remove_nodes(&mut element.children, matches, removed);
                kept.push(Node::Element(element));
            }
            other => kept.push(other),
        }
    }
    *nodes = kept;
}

impl Document {
    #[must_use]
    pub fn parse(markup: &str) -> Self {
        ParsedHtml::parse(markup).to_document()
    }

    /// Serialize and parse again in the same mode, for passes that need
    /// the `scraper` tree of the current state.
    #[must_use]
    pub fn reparse(&self) -> ParsedHtml {
        ParsedHtml::parse_as(&self.to_html(), self.kind)
    }

    /// Pre-order walk over elements with their ancestor chain
    /// (outermost first).
    pub fn visit_elements<'a>(&'a self, mut visit: impl FnMut(&'a Element, &[&'a Element])) {
        let mut ancestors = Vec::new();
        visit_nodes(&self.nodes, &mut ancestors, &mut visit);
    }

    /// Pre-order walk over elements for in-place edits. Visits elements in
    /// the same order as [`ParsedHtml::elements`] on the tree this document
    /// was built from.
    pub fn for_each_element_mut(&mut self, mut visit: impl FnMut(&mut Element)) {
        visit_nodes_mut(&mut self.nodes, &mut visit);
    }

    /// Elements in document order.
    #[must_use]
    pub fn elements(&self) -> Vec<&Element> {
        let mut elements = Vec::new();
        self.visit_elements(|element, _| elements.push(element));
        elements
    }

    /// Pre-order edit pass that can also drop elements: `edit` returning
    /// `false` detaches the element along with its subtree.
    pub fn retain_elements_mut(&mut self, mut edit: impl FnMut(&mut Element) -> bool) {
        retain_nodes(&mut self.nodes, &mut edit);
    }

    /// Detach every element matching `matches`, outermost first, and return
    /// them in document order. Descendants of a removed element are not
    /// examined.
    pub fn remove_elements(&mut self, mut matches: impl FnMut(&Element) -> bool) -> Vec<Element> {
        let mut removed = Vec::new();
        remove_nodes(&mut self.nodes, &mut matches, &mut removed);
        removed
    }

    /// First element named `name` in document order.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut Element> {
        fn find<'a>(nodes: &'a mut [Node], name: &str) -> Option<&'a mut Element> {
            for node in nodes {
                if let Node::Element(element) = node {
                    if element.name == name {
                        return Some(element);
                    }
                    if let Some(found) = find(&mut element.children, name) {
                        return Some(found);
                    }
                }
            }
            None
        }
        find(&mut self.nodes, name)
    }

    #[must_use]
    pub fn contains_element(&self, name: &str) -> bool {
        let mut found = false;
        self.visit_elements(|element, _| found |= element.name == name);
        found
    }

    #[must_use]
    pub fn to_html(&self) -> String {
        self.to_string()
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────

/// A `scraper` tree plus the mode it was parsed in.
pub struct ParsedHtml {
    html: Html,
    kind: Markup,
}

impl fmt::Debug for ParsedHtml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedHtml")
            .field("kind", &self.kind)
            .field("errors", &self.html.errors.len())
            .finish_non_exhaustive()
    }
}

impl ParsedHtml {
    #[must_use]
    pub fn parse(markup: &str) -> Self {
        Self::parse_as(markup, Markup::detect(markup))
    }

    #[must_use]
    pub fn parse_as(markup: &str, kind: Markup) -> Self {
        let html = match kind {
            Markup::Document => Html::parse_document(markup),
            Markup::Fragment => Html::parse_fragment(markup),
        };
        if !html.errors.is_empty() {
            tracing::trace!(
                target: "mailcompat.transform",
                errors = html.errors.len(),
                "recovered from malformed markup"
            );
        }
        Self { html, kind }
    }

    #[must_use]
    pub fn kind(&self) -> Markup {
        self.kind
    }

    /// Content elements in document order. A fragment's wrapper element is
    /// not content.
    #[must_use]
    pub fn elements(&self) -> Vec<ElementRef<'_>> {
        match self.kind {
            Markup::Document => self
                .html
                .tree
                .root()
                .descendants()
                .filter_map(ElementRef::wrap)
                .collect(),
            Markup::Fragment => self
                .html
                .root_element()
                .descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .collect(),
        }
    }

    #[must_use]
    pub fn to_document(&self) -> Document {
        let nodes = match self.kind {
            Markup::Document => self
                .html
                .tree
                .root()
                .children()
                .filter_map(|child| convert_node(child.value(), ElementRef::wrap(child)))
                .collect(),
            Markup::Fragment => convert_element(self.html.root_element()).children,
        };
        Document {
            nodes,
            kind: self.kind,
        }
    }
}

fn convert_node(node: &scraper::Node, element: Option<ElementRef<'_>>) -> Option<Node> {
    match node {
        scraper::Node::Element(_) => element.map(|element| Node::Element(convert_element(element))),
        scraper::Node::Text(text) => Some(Node::Text(String::from(&**text))),
        scraper::Node::Comment(comment) => Some(Node::Comment(String::from(&**comment))),
        scraper::Node::Doctype(doctype) => Some(Node::Doctype(doctype.name().to_string())),
        _ => None,
    }
}

fn convert_element(element: ElementRef<'_>) -> Element {
    let value = element.value();
    let mut attrs: Vec<Attribute> = value
        .attrs()
        .map(|(name, value)| Attribute {
            name: name.to_string(),
            value: value.to_string(),
        })
        .collect();
    attrs.sort_by(|a, b| a.name.cmp(&b.name));
    Element {
        name: value.name().to_string(),
        attrs,
        children: element
            .children()
            .filter_map(|child| convert_node(child.value(), ElementRef::wrap(child)))
            .collect(),
    }
}

// ── Serialization ────────────────────────────────────────────────────────

fn write_escaped(f: &mut fmt::Formatter<'_>, text: &str, in_attribute: bool) -> fmt::Result {
    for ch in text.chars() {
        match ch {
            '&' => f.write_str("&amp;")?,
            '\u{a0}' => f.write_str("&nbsp;")?,
            '"' if in_attribute => f.write_str("&quot;")?,
            '<' if !in_attribute => f.write_str("&lt;")?,
            '>' if !in_attribute => f.write_str("&gt;")?,
            _ => f.write_char(ch)?,
        }
    }
    Ok(())
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &Node, raw_text: bool) -> fmt::Result {
    match node {
        Node::Element(element) => write!(f, "{element}"),
        Node::Text(text) if raw_text => f.write_str(text),
        Node::Text(text) => write_escaped(f, text, false),
        Node::Comment(text) => write!(f, "<!--{text}-->"),
        Node::Doctype(name) => write!(f, "<!DOCTYPE {name}>"),
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for attr in &self.attrs {
            write!(f, " {}=\"", attr.name)?;
            write_escaped(f, &attr.value, true)?;
            f.write_char('"')?;
        }
        f.write_char('>')?;
        if is_void_element(&self.name) {
            return Ok(());
        }
        let raw_text = self.is_raw_text();
        for child in &self.children {
            write_node(f, child, raw_text)?;
        }
        write!(f, "</{}>", self.name)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(f, self, false)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            write!(f, "{node}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Document, Markup, Node, ParsedHtml};

    fn round_trip(markup: &str) -> String {
        Document::parse(markup).to_html()
    }

    #[test]
    fn fragments_and_documents_are_told_apart() {
        assert_eq!(Markup::detect("<p>x</p>"), Markup::Fragment);
        assert_eq!(Markup::detect("<header>x</header>"), Markup::Fragment);
        assert_eq!(Markup::detect("<!doctype html><p>x</p>"), Markup::Document);
        assert_eq!(Markup::detect("<HTML lang=\"en\"><p>x</p></HTML>"), Markup::Document);
        assert_eq!(Markup::detect("<body>x</body>"), Markup::Document);
    }

    #[test]
    fn well_formed_document_round_trips() {
        let markup = concat!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\">",
            "<style>.a > p { color: red }</style></head>",
            "<body><!-- note --><div class=\"a\" style=\"color:red\">x &amp; y</div>",
            "<img src=\"a.png\"><br></body></html>"
        );
        assert_eq!(round_trip(markup), markup);
    }

    #[test]
    fn fragments_serialize_without_a_shell() {
        let markup = "<p style=\"font-family: メイリオ\">こんにちは</p><span>ok</span>";
        assert_eq!(round_trip(markup), markup);
        assert_eq!(Document::parse(markup).kind, Markup::Fragment);
    }

    #[test]
    fn attributes_are_lowercased_and_decoded() {
        let doc = Document::parse("<img WIDTH=100 Alt='say \"hi\"' hidden>");
        let image = doc.elements()[0];
        assert_eq!(image.name, "img");
        assert_eq!(image.attr("width"), Some("100"));
        assert_eq!(image.attr("alt"), Some("say \"hi\""));
        assert_eq!(image.attr("hidden"), Some(""));
        let html = doc.to_html();
        assert!(html.contains("alt=\"say &quot;hi&quot;\""));
        assert!(html.contains("hidden=\"\""));
    }

    #[test]
    fn unbalanced_markup_recovers() {
        assert_eq!(
            round_trip("<div><span>open</div>tail"),
            "<div><span>open</span></div>tail"
        );
        assert_eq!(round_trip("<ul><li>a<li>b</ul>"), "<ul><li>a</li><li>b</li></ul>");
        assert_eq!(round_trip("<p>one<p>two"), "<p>one</p><p>two</p>");
        assert_eq!(
            round_trip("<table><tr><td>a<td>b</table>"),
            "<table><tbody><tr><td>a</td><td>b</td></tr></tbody></table>"
        );
    }

    #[test]
    fn raw_text_elements_are_not_escaped() {
        let markup = "<style>a > b { color: red }</style><script>if (a<b) {}</script>";
        let doc = Document::parse(markup);
        let elements = doc.elements();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].text(), "a > b { color: red }");
        assert_eq!(elements[1].text(), "if (a<b) {}");
        assert_eq!(doc.to_html(), markup);
    }

    #[test]
    fn stray_angle_bracket_is_escaped_text() {
        let doc = Document::parse("1 < 2 <b>bold</b>");
        assert!(matches!(&doc.nodes[0], Node::Text(text) if text == "1 < 2 "));
        assert_eq!(doc.to_html(), "1 &lt; 2 <b>bold</b>");
    }

    #[test]
    fn scraper_elements_follow_tree_order() {
        let parsed = ParsedHtml::parse("<div><p>a</p><span><b>b</b></span></div><i>c</i>");
        let names: Vec<_> = parsed
            .elements()
            .iter()
            .map(|element| element.value().name().to_string())
            .collect();
        assert_eq!(names, vec!["div", "p", "span", "b", "i"]);

        let mut doc = parsed.to_document();
        let mut visited = Vec::new();
        doc.for_each_element_mut(|element| visited.push(element.name.clone()));
        assert_eq!(visited, names);
    }

    #[test]
    fn remove_elements_returns_outermost_matches() {
        let mut doc = Document::parse("<div><video><video></video></video><p>keep</p></div>");
        let removed = doc.remove_elements(|element| element.name == "video");
        assert_eq!(removed.len(), 1);
        assert_eq!(doc.to_html(), "<div><p>keep</p></div>");
    }

    #[test]
    fn visit_elements_reports_ancestors() {
        let doc = Document::parse("<table><tr><td><b>x</b></td></tr></table>");
        let mut chains = Vec::new();
        doc.visit_elements(|element, ancestors| {
            if element.name == "b" {
                chains.extend(ancestors.iter().map(|ancestor| ancestor.name.clone()));
            }
        });
        assert_eq!(chains, vec!["table", "tbody", "tr", "td"]);
    }

    #[test]
    fn attribute_edits() {
        let mut doc = Document::parse("<div class=\"a b\" style=\"x\">t</div>");
        doc.for_each_element_mut(|element| {
            assert_eq!(element.remove_attr("style").as_deref(), Some("x"));
            element.set_attr("class", "c");
            element.set_attr("id", "main");
        });
        assert_eq!(doc.to_html(), "<div class=\"c\" id=\"main\">t</div>");
        assert_eq!(doc.reparse().to_document(), doc);
    }
}
