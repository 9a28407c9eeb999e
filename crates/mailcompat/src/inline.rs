//! Moves `<style>` rules onto the `style` attribute of matching elements.

use scraper::ElementRef;

use crate::css::{
    CssItem, Declaration, Specificity, StyleSelector, parse_declarations, parse_selector_list,
    parse_stylesheet, serialize_declarations,
};
use crate::html::{Document, Element, Node};

/// Elements that never carry presentational styles.
const NON_VISUAL: &[&str] = &["head", "title", "meta", "link", "base", "style", "script"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineOptions {
    /// Leave `<style>` elements in place after inlining.
    pub keep_style_tags: bool,
    /// When style tags are removed, carry `@media` blocks into the residual
    /// stylesheet.
    pub keep_media_queries: bool,
    /// When style tags are removed, carry `@font-face` blocks into the
    /// residual stylesheet.
    pub keep_font_faces: bool,
}

impl InlineOptions {
    /// Word-engine output: styles inlined, tags gone, fonts kept.
    pub const WORD: Self = Self {
        keep_style_tags: false,
        keep_media_queries: false,
        keep_font_faces: true,
    };

    /// Normalization: styles inlined, the original blocks stay.
    pub const PRESERVE: Self = Self {
        keep_style_tags: true,
        keep_media_queries: true,
        keep_font_faces: true,
    };
}

struct Candidate {
    selector: StyleSelector,
    declarations: Vec<(usize, Declaration)>,
}

/// Rule candidates from every stylesheet plus the residual at-rules.
fn collect(doc: &Document, options: InlineOptions) -> (Vec<Candidate>, Vec<String>) {
    let mut candidates = Vec::new();
    let mut residual = Vec::new();
    let mut order = 0_usize;

    doc.visit_elements(|element, _| {
        if element.name != "style" {
            return;
        }
        let sheet = parse_stylesheet(&element.text());
        for item in &sheet.items {
            let rule = match item {
                CssItem::Rule(rule) => rule,
                CssItem::AtRule(text) => {
                    let keep = match item.at_keyword().as_deref() {
                        Some("font-face") => options.keep_font_faces,
                        Some("media") => options.keep_media_queries,
                        _ => false,
                    };
                    if keep {
                        residual.push(text.clone());
                    }
                    continue;
                }
            };
            let Some(selectors) = parse_selector_list(&rule.selectors) else {
                continue;
            };
            let declarations: Vec<_> = rule
                .declarations()
                .into_iter()
                .map(|decl| {
                    order += 1;
                    (order, decl)
                })
                .collect();
            for selector in selectors {
                candidates.push(Candidate {
                    selector,
                    declarations: declarations.clone(),
                });
            }
        }
    });

    (candidates, residual)
}

/// Cascade the matching candidates for one element into one declaration per
/// property, in order of first appearance.
fn cascade(candidates: &[Candidate], element: &ElementRef<'_>) -> Vec<Declaration> {
    let mut matched: Vec<(bool, Specificity, usize, &Declaration)> = candidates
        .iter()
        .filter(|candidate| candidate.selector.selector.matches(element))
        .flat_map(|candidate| {
            candidate.declarations.iter().map(|(order, decl)| {
                (decl.is_important(), candidate.selector.specificity, *order, decl)
            })
        })
        .collect();
    matched.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));

    let mut resolved: Vec<Declaration> = Vec::new();
    for (_, _, _, decl) in matched {
        let name = decl.name();
        match resolved.iter_mut().find(|existing| existing.name() == name) {
            Some(existing) => existing.value.clone_from(&decl.value),
            None => resolved.push(decl.clone()),
        }
    }
    resolved
}

/// Merge cascaded stylesheet declarations with an element's own inline
/// declarations. Inline wins unless the stylesheet side is `!important` and
/// the inline side is not.
fn merge(sheet: Vec<Declaration>, inline: Vec<Declaration>) -> Vec<Declaration> {
    let mut merged = Vec::with_capacity(sheet.len() + inline.len());
    let mut inline = inline;
    for decl in sheet {
        let name = decl.name();
        match inline.iter_mut().find(|existing| existing.name() == name) {
            Some(existing) if decl.is_important() && !existing.is_important() => {
                existing.value = decl.value;
            }
            Some(_) => {}
            None => merged.push(decl),
        }
    }
    merged.extend(inline);
    merged
}

/// Inline every `<style>` rule into matching elements.
///
/// Returns the number of elements whose `style` attribute changed.
pub fn inline_styles(doc: &mut Document, options: InlineOptions) -> usize {
    let (candidates, residual) = collect(doc, options);

    let mut updated = 0_usize;
    if !candidates.is_empty() {
        let parsed = doc.reparse();
        let plans: Vec<Option<Vec<Declaration>>> = parsed
            .elements()
            .iter()
            .map(|element| {
                if NON_VISUAL.contains(&element.value().name()) {
                    None
                } else {
                    Some(cascade(&candidates, element)).filter(|decls| !decls.is_empty())
                }
            })
            .collect();

        let mut inlined = parsed.to_document();
        let mut plans = plans.into_iter();
        inlined.for_each_element_mut(|element| {
            let Some(Some(sheet)) = plans.next() else {
                return;
            };
            let inline = parse_declarations(element.attr("style").unwrap_or_default());
            element.set_attr("style", serialize_declarations(&merge(sheet, inline)));
            updated += 1;
        });
        *doc = inlined;
    }

    if !options.keep_style_tags {
        doc.remove_elements(|element| element.name == "style");
        if !residual.is_empty() {
            let mut style = Element::new("style");
            style.set_text(residual.join("\n"));
            match doc.find_mut("head") {
                Some(head) => head.children.push(Node::Element(style)),
                None => doc.nodes.insert(0, Node::Element(style)),
            }
        }
    }

    tracing::debug!(
        target: "mailcompat.transform",
        rules = candidates.len(),
        updated,
        kept_tags = options.keep_style_tags,
        "inlined stylesheet rules"
    );
    updated
}
