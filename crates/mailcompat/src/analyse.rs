//! Per-client analysis of render results against the original markup.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::client::ClientId;
use crate::css::{CssItem, Stylesheet, parse_declarations, parse_stylesheet};
use crate::error::Result;
use crate::html::Document;
use crate::render::RenderResult;
use crate::rules::{ClientRules, RulePattern};
use crate::warning::{DomDiff, Severity, Warning, WarningKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub client_id: ClientId,
    pub warnings: Vec<Warning>,
    pub diff: DomDiff,
}

/// What a document declares: property names and element names, lowercased.
#[derive(Debug, Default)]
struct Inventory {
    properties: BTreeSet<String>,
    elements: BTreeSet<String>,
}

impl Inventory {
    fn collect(doc: &Document) -> Self {
        let mut inventory = Self::default();
        doc.visit_elements(|element, _| {
            inventory.elements.insert(element.name.clone());
            if let Some(style) = element.attr("style") {
                inventory.add_declarations(style);
            }
            if element.name == "style" {
                inventory.add_stylesheet(&parse_stylesheet(&element.text()));
            }
        });
        inventory
    }

    fn add_declarations(&mut self, text: &str) {
        self.properties
            .extend(parse_declarations(text).iter().map(|decl| decl.name()));
    }

    /// Rules at any nesting depth, including inside `@media` blocks.
    fn add_stylesheet(&mut self, sheet: &Stylesheet) {
        for item in &sheet.items {
            match item {
                CssItem::Rule(rule) => self.add_declarations(&rule.body),
                CssItem::AtRule(text) => {
                    let (Some(open), Some(close)) = (text.find('{'), text.rfind('}')) else {
                        continue;
                    };
                    if open >= close {
                        continue;
                    }
                    let inner = &text[open + 1..close];
                    if inner.contains('{') {
                        self.add_stylesheet(&parse_stylesheet(inner));
                    } else {
                        self.add_declarations(inner);
                    }
                }
            }
        }
    }

    fn matches(&self, pattern: &RulePattern) -> bool {
        match pattern {
            RulePattern::Property(name) => self.properties.contains(name),
            RulePattern::Element(name) => self.elements.contains(name),
        }
    }
}

/// Independent compatibility check of `html` for one client.
///
/// Unlike the transformer this only reports: one warning per hard-unsupported
/// property present, then one per rule whose property or element appears.
#[must_use]
pub fn check_compatibility(html: &str, rules: &ClientRules) -> Vec<Warning> {
    let doc = Document::parse(html);
    let inventory = Inventory::collect(&doc);
    let client = rules.css.client_id;

    let mut warnings: Vec<Warning> = rules
        .css
        .unsupported_properties
        .iter()
        .filter(|property| inventory.properties.contains(*property))
        .map(|property| {
            Warning::new(
                WarningKind::UnsupportedCss,
                Severity::Warning,
                format!("CSS property \"{property}\" is not fully supported in {client}"),
            )
            .with_property(property.clone())
        })
        .collect();

    warnings.extend(
        rules
            .all_rules()
            .filter(|rule| inventory.matches(&rule.pattern))
            .map(|rule| {
                Warning::new(WarningKind::Compatibility, rule.severity, rule.message.clone())
            }),
    );
    warnings
}

/// Combine each render result with a fresh check of `original_html`.
///
/// `rules_for` supplies the rules for a result's client; its failure aborts
/// the analysis. Results keep input order.
pub fn analyse(
    original_html: &str,
    results: &[RenderResult],
    mut rules_for: impl FnMut(ClientId) -> Result<Arc<ClientRules>>,
) -> Result<Vec<AnalysisResult>> {
    results
        .iter()
        .map(|result| {
            let rules = rules_for(result.client_id)?;
            let mut warnings = check_compatibility(original_html, &rules);
            warnings.extend(result.warnings.iter().cloned());
            Ok(AnalysisResult {
                client_id: result.client_id,
                warnings,
                diff: result.diff.clone(),
            })
        })
        .collect()
}
