//! Client-scoped transformation of email markup against compatibility rules.
//!
//! Destructive edits:
//! - declarations of hard-unsupported properties are dropped from inline
//!   styles and `<style>` rules;
//! - a `style` attribute left without declarations is removed;
//! - a `<style>` block left without rules is removed;
//! - elements with an `error` element rule are removed with their subtree.
//!
//! Everything else that matches a rule is kept and reported. Markup that
//! matches nothing is passed through verbatim.

use serde::{Deserialize, Serialize};

use crate::css::{CssItem, Declaration, StyleRule, declaration_segments, parse_stylesheet};
use crate::html::Document;
use crate::rules::{ClientCompatibility, ClientRules, CompatibilityRule};
use crate::warning::{
    DomDiff, ModifiedStyle, RemovedAttribute, RemovedNode, Severity, Warning, WarningKind,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutput {
    pub html: String,
    pub warnings: Vec<Warning>,
    pub diff: DomDiff,
}

struct CssPass<'a> {
    compat: &'a ClientCompatibility,
    warnings: Vec<Warning>,
    diff: DomDiff,
}

impl<'a> CssPass<'a> {
    fn new(compat: &'a ClientCompatibility) -> Self {
        Self {
            compat,
            warnings: Vec::new(),
            diff: DomDiff::default(),
        }
    }

    fn unsupported_message(&self, property: &str) -> String {
        self.compat.rule_for(property).map_or_else(
            || {
                format!(
                    "CSS property \"{property}\" is not supported in {} and will be removed.",
                    self.compat.client_id
                )
            },
            |rule| rule.message.clone(),
        )
    }

    /// Check every declaration in `text`. Returns the surviving segments
    /// verbatim and whether anything was dropped.
    fn filter<'t>(&mut self, text: &'t str, selector: &str) -> (Vec<&'t str>, bool) {
        let mut kept = Vec::new();
        let mut dropped = false;

        for segment in declaration_segments(text) {
            let Some(decl) = Declaration::parse(segment) else {
                continue;
            };
            let name = decl.name();

            if self.compat.is_unsupported(&name) {
                let message = self.unsupported_message(&name);
                self.diff.modified_styles.push(ModifiedStyle {
                    selector: selector.to_string(),
                    property: decl.property.clone(),
                    original_value: decl.value.clone(),
                    new_value: None,
                    reason: Some(message.clone()),
                });
                self.warnings.push(
                    Warning::new(WarningKind::UnsupportedCss, Severity::Error, message)
                        .with_property(decl.property)
                        .with_selector(selector),
                );
                dropped = true;
                continue;
            }

            if let Some(rule) = self.compat.warning_rule_for(&name) {
                self.warnings.push(
                    Warning::new(
                        WarningKind::UnsupportedCss,
                        Severity::Warning,
                        rule.message.clone(),
                    )
                    .with_property(decl.property)
                    .with_selector(selector),
                );
            }
            kept.push(segment);
        }

        (kept, dropped)
    }

    fn inline_styles(&mut self, doc: &mut Document) {
        doc.for_each_element_mut(|element| {
            let Some(style) = element.attr("style").map(str::to_string) else {
                return;
            };
            let (kept, dropped) = self.filter(&style, &element.name);
            if !dropped {
                return;
            }
            if kept.is_empty() {
                element.remove_attr("style");
                self.diff.removed_attributes.push(RemovedAttribute {
                    element: element.name.clone(),
                    attribute: "style".to_string(),
                    value: Some(style),
                    reason: Some("no supported declarations remain".to_string()),
                });
            } else {
                element.set_attr("style", kept.join("; "));
            }
        });
    }

    fn style_blocks(&mut self, doc: &mut Document) {
        doc.retain_elements_mut(|element| {
            if element.name != "style" {
                return true;
            }
            let text = element.text();
            if text.trim().is_empty() {
                return true;
            }

            let sheet = parse_stylesheet(&text);
            let mut items = Vec::with_capacity(sheet.items.len());
            let mut changed = false;
            for item in sheet.items {
                match item {
                    CssItem::Rule(rule) => {
                        let (kept, dropped) = self.filter(&rule.body, &rule.selectors);
                        changed |= dropped;
                        if !kept.is_empty() {
                            items.push(CssItem::Rule(StyleRule {
                                body: kept.join("; "),
                                selectors: rule.selectors,
                            }));
                        }
                    }
                    at_rule @ CssItem::AtRule(_) => items.push(at_rule),
                }
            }

            if !changed {
                return true;
            }
            if items.is_empty() {
                self.diff.removed_nodes.push(RemovedNode {
                    tag_name: "style".to_string(),
                    selector: "style".to_string(),
                    reason: Some("no supported rules remain".to_string()),
                });
                return false;
            }
            let rewritten: Vec<String> = items.iter().map(ToString::to_string).collect();
            element.set_text(rewritten.join("\n"));
            true
        });
    }
}

fn apply_element_rule(
    doc: &mut Document,
    rule: &CompatibilityRule,
    warnings: &mut Vec<Warning>,
    diff: &mut DomDiff,
) {
    let Some(name) = rule.pattern.element_name() else {
        return;
    };

    if rule.severity == Severity::Error {
        for removed in doc.remove_elements(|element| element.name == name) {
            warnings.push(
                Warning::new(WarningKind::RemovedNode, Severity::Error, rule.message.clone())
                    .with_selector(removed.name.clone()),
            );
            diff.removed_nodes.push(RemovedNode {
                selector: removed.name.clone(),
                tag_name: removed.name,
                reason: Some(rule.message.clone()),
            });
        }
        return;
    }

    doc.visit_elements(|element, _| {
        if rule.pattern.matches_element(&element.name) {
            warnings.push(
                Warning::new(WarningKind::Compatibility, rule.severity, rule.message.clone())
                    .with_selector(element.name.clone()),
            );
        }
    });
}

/// Transform `html` for one client.
///
/// Inline styles and `<style>` blocks are checked first, then element rules
/// run, so declarations inside a removed subtree are still reported.
#[must_use]
pub fn transform(html: &str, rules: &ClientRules) -> TransformOutput {
    let mut doc = Document::parse(html);

    let mut css = CssPass::new(&rules.css);
    css.inline_styles(&mut doc);
    css.style_blocks(&mut doc);

    let CssPass {
        mut warnings,
        mut diff,
        ..
    } = css;
    let css_warnings = warnings.len();
    for rule in &rules.html {
        apply_element_rule(&mut doc, rule, &mut warnings, &mut diff);
    }

    tracing::debug!(
        target: "mailcompat.transform",
        client = %rules.css.client_id,
        css_warnings,
        html_warnings = warnings.len() - css_warnings,
        removed_nodes = diff.removed_nodes.len(),
        dropped_declarations = diff.modified_styles.len(),
        "transformed markup"
    );

    TransformOutput {
        html: doc.to_html(),
        warnings,
        diff,
    }
}
