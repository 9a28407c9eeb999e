//! Minimal CSS reading for email markup: declaration lists, stylesheets and
//! the selectors used to inline rules onto elements.

use std::fmt;

use crate::rules::normalize_property;

const IMPORTANT: &str = "!important";

// ── Declarations ─────────────────────────────────────────────────────────

/// One `property: value` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    /// Property name as written, trimmed.
    pub property: String,
    /// Trimmed value, including any `!important` marker.
    pub value: String,
}

impl Declaration {
    #[must_use]
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }

    /// Parse one `property: value` segment.
    #[must_use]
    pub fn parse(segment: &str) -> Option<Self> {
        let (property, value) = segment.split_once(':')?;
        let property = property.trim();
        (!property.is_empty()).then(|| Self::new(property, value.trim()))
    }

    /// Lowercased property name.
    #[must_use]
    pub fn name(&self) -> String {
        normalize_property(&self.property)
    }

    #[must_use]
    pub fn is_important(&self) -> bool {
        let value = self.value.trim_end().as_bytes();
        value.len() >= IMPORTANT.len()
            && value[value.len() - IMPORTANT.len()..].eq_ignore_ascii_case(IMPORTANT.as_bytes())
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.property, self.value)
    }
}

/// Split `text` on `separator` outside quotes and parentheses.
fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (index, ch) in text.char_indices() {
        match (quote, ch) {
            (Some(open), _) if ch == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, _) if ch == separator && depth == 0 => {
                parts.push(&text[start..index]);
                start = index + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Trimmed, non-blank `;`-separated segments of a declaration list.
#[must_use]
pub fn declaration_segments(text: &str) -> Vec<&str> {
    split_top_level(text, ';')
        .into_iter()
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Parse a declaration list such as a `style` attribute.
///
/// Blank segments and segments without a property name are skipped.
#[must_use]
pub fn parse_declarations(text: &str) -> Vec<Declaration> {
    declaration_segments(text)
        .into_iter()
        .filter_map(Declaration::parse)
        .collect()
}

#[must_use]
pub fn serialize_declarations(declarations: &[Declaration]) -> String {
    declarations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Stylesheets ──────────────────────────────────────────────────────────

/// A plain `selectors { declarations }` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRule {
    /// Selector prelude as written, trimmed.
    pub selectors: String,
    /// Raw declaration block between the braces.
    pub body: String,
}

impl StyleRule {
    #[must_use]
    pub fn declarations(&self) -> Vec<Declaration> {
        parse_declarations(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssItem {
    Rule(StyleRule),
    /// Verbatim at-rule text, e.g. `@media (...) { ... }` or `@import ...;`.
    AtRule(String),
}

impl CssItem {
    /// Lowercased at-rule keyword without `@`.
    #[must_use]
    pub fn at_keyword(&self) -> Option<String> {
        let Self::AtRule(text) = self else {
            return None;
        };
        let keyword: String = text
            .trim_start_matches('@')
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '-')
            .collect();
        Some(keyword.to_ascii_lowercase())
    }
}

impl fmt::Display for CssItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(rule) => write!(f, "{} {{ {} }}", rule.selectors, rule.body.trim()),
            Self::AtRule(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stylesheet {
    pub items: Vec<CssItem>,
}

impl Stylesheet {
    pub fn rules(&self) -> impl Iterator<Item = &StyleRule> {
        self.items.iter().filter_map(|item| match item {
            CssItem::Rule(rule) => Some(rule),
            CssItem::AtRule(_) => None,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Display for Stylesheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, item) in self.items.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{item}")?;
        }
        Ok(())
    }
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        rest = match rest[start + 2..].find("*/") {
            Some(end) => &rest[start + 2 + end + 2..],
            None => "",
        };
    }
    out.push_str(rest);
    out
}

/// Byte offset of the `}` closing the block whose `{` is at `open`.
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0_usize;
    let mut quote: Option<char> = None;
    for (index, ch) in text[open..].char_indices() {
        match (quote, ch) {
            (Some(q), _) if ch == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '{') => depth += 1,
            (None, '}') => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + index);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the contents of a `<style>` element. Comments are discarded;
/// an unterminated trailing block is dropped.
#[must_use]
pub fn parse_stylesheet(text: &str) -> Stylesheet {
    let text = strip_comments(text);
    let mut items = Vec::new();
    let mut pos = 0;

    loop {
        let rest = &text[pos..];
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            break;
        }
        pos += rest.len() - trimmed.len();

        let brace = trimmed.find('{');
        if trimmed.starts_with('@') {
            let semicolon = trimmed.find(';');
            let statement_end = match (semicolon, brace) {
                (Some(semi), Some(open)) if semi < open => Some(semi),
                (Some(semi), None) => Some(semi),
                _ => None,
            };
            if let Some(semi) = statement_end {
                items.push(CssItem::AtRule(trimmed[..=semi].to_string()));
                pos += semi + 1;
                continue;
            }
        }

        let Some(open) = brace else {
            break;
        };
        let Some(close) = matching_brace(trimmed, open) else {
            break;
        };
        let prelude = trimmed[..open].trim();
        if prelude.starts_with('@') {
            items.push(CssItem::AtRule(trimmed[..=close].to_string()));
        } else if !prelude.is_empty() {
            items.push(CssItem::Rule(StyleRule {
                selectors: prelude.to_string(),
                body: trimmed[open + 1..close].to_string(),
            }));
        }
        pos += close + 1;
    }

    Stylesheet { items }
}

// ── Selectors ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Specificity(pub u32, pub u32, pub u32);

fn skip_name(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars
        .next_if(|&ch| ch.is_alphanumeric() || matches!(ch, '-' | '_'))
        .is_some()
    {}
}

impl Specificity {
    /// Specificity of one complex selector: ids, then classes, attributes
    /// and pseudo-classes, then type selectors and pseudo-elements.
    /// Arguments of functional pseudo-classes are not counted.
    #[must_use]
    pub fn of(selector: &str) -> Self {
        let mut spec = Self::default();
        let mut chars = selector.chars().peekable();
        let mut depth = 0_usize;

        while let Some(ch) = chars.next() {
            match ch {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ if depth > 0 => {}
                '#' => {
                    spec.0 += 1;
                    skip_name(&mut chars);
                }
                '.' => {
                    spec.1 += 1;
                    skip_name(&mut chars);
                }
                '[' => {
                    spec.1 += 1;
                    while chars.next().is_some_and(|ch| ch != ']') {}
                }
                ':' => {
                    if chars.next_if_eq(&':').is_some() {
                        spec.2 += 1;
                    } else {
                        spec.1 += 1;
                    }
                    skip_name(&mut chars);
                }
                _ if ch.is_alphabetic() => {
                    spec.2 += 1;
                    skip_name(&mut chars);
                }
                _ => {}
            }
        }
        spec
    }
}

/// One member of a selector list, matched through `scraper`.
#[derive(Debug, Clone)]
pub struct StyleSelector {
    pub text: String,
    pub selector: scraper::Selector,
    pub specificity: Specificity,
}

/// Parse a comma-separated selector list. `None` when any member does not
/// parse (state pseudo-classes such as `:hover` among them), since such a
/// rule cannot be resolved against static markup.
#[must_use]
pub fn parse_selector_list(text: &str) -> Option<Vec<StyleSelector>> {
    split_top_level(text, ',')
        .into_iter()
        .map(|member| {
            let member = member.trim();
            let selector = scraper::Selector::parse(member).ok()?;
            Some(StyleSelector {
                text: member.to_string(),
                selector,
                specificity: Specificity::of(member),
            })
        })
        .collect()
}
