//! Word-engine approximation for Outlook on Windows.
//!
//! Runs after the dataset-driven transform: layout declarations Word cannot
//! render are reported, stylesheets are inlined, the same declarations are
//! stripped, and a conditional `mso` reset block is injected into `<head>`.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::css::{Declaration, declaration_segments};
use crate::html::{Document, Node};
use crate::inline::{InlineOptions, inline_styles};
use crate::transform::TransformOutput;
use crate::warning::{DomDiff, ModifiedStyle, Severity, Warning, WarningKind};

pub const SIMULATION_NOTICE: &str = "This is a simulation of Outlook Windows rendering. \
     Actual Word rendering engine may produce different results.";

pub const LAYOUT_SUMMARY: &str = "Flexbox and Grid layouts have been stripped. \
     Consider using table-based layouts for Outlook compatibility.";

const MSO_MARKER: &str = "[if mso]";

const MSO_BLOCK: &str = "[if mso]>
<style type=\"text/css\">
  body, table, td {
    font-family: Calibri, Arial, sans-serif !important;
  }
  table {
    border-collapse: collapse;
  }
</style>
<![endif]";

/// Declarations the Word engine drops or mangles, anchored at the start of a
/// single trimmed declaration. Property families such as
/// `background-image` or `transition-duration` are covered by the optional
/// `-suffix`.
static DENYLIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^(?:",
        r"display\s*:\s*(?:inline-)?(?:flex|grid)\b",
        r"|position\s*:\s*(?:fixed|sticky)\b",
        r"|(?:background-(?:image|size|position)|border-radius|box-shadow|text-shadow",
        r"|opacity|transform|transition|animation|filter|clip-path",
        r"|object-(?:fit|position))(?:-[a-z-]+)?\s*:",
        r")"
    ))
    .expect("outlook denylist regex")
});

static LAYOUT_DISPLAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)display\s*:\s*(?:inline-)?(?:flex|grid)").expect("layout display regex")
});

#[must_use]
pub fn is_denylisted(declaration: &str) -> bool {
    DENYLIST.is_match(declaration.trim())
}

/// One warning per distinct denylisted property, in first-seen order.
#[must_use]
pub fn detect_unsupported(doc: &Document) -> Vec<Warning> {
    let mut seen = BTreeSet::new();
    let mut warnings = Vec::new();

    doc.visit_elements(|element, _| {
        let Some(style) = element.attr("style") else {
            return;
        };
        for segment in declaration_segments(style) {
            if !is_denylisted(segment) {
                continue;
            }
            let Some(decl) = Declaration::parse(segment) else {
                continue;
            };
            if seen.insert(decl.property.clone()) {
                warnings.push(
                    Warning::new(
                        WarningKind::UnsupportedCss,
                        Severity::Warning,
                        format!(
                            "CSS property \"{}\" is not supported in Outlook and will be removed.",
                            decl.property
                        ),
                    )
                    .with_property(decl.property),
                );
            }
        }
    });
    warnings
}

/// Remove denylisted declarations from every inline style.
pub fn strip_denylisted(doc: &mut Document) -> DomDiff {
    let mut diff = DomDiff::default();
    doc.for_each_element_mut(|element| {
        let Some(style) = element.attr("style").map(str::to_string) else {
            return;
        };
        let (stripped, kept): (Vec<&str>, Vec<&str>) = declaration_segments(&style)
            .into_iter()
            .partition(|segment| is_denylisted(segment));
        if stripped.is_empty() {
            return;
        }
        for decl in stripped.into_iter().filter_map(Declaration::parse) {
            diff.modified_styles.push(ModifiedStyle {
                selector: element.name.clone(),
                property: decl.property,
                original_value: decl.value,
                new_value: None,
                reason: Some("not rendered by the Word engine".to_string()),
            });
        }
        if kept.is_empty() {
            element.remove_attr("style");
        } else {
            element.set_attr("style", kept.join("; "));
        }
    });
    diff
}

fn has_mso_block(doc: &Document) -> bool {
    fn scan(nodes: &[Node]) -> bool {
        nodes.iter().any(|node| match node {
            Node::Comment(text) => text.trim_start().starts_with(MSO_MARKER),
            Node::Element(element) => scan(&element.children),
            _ => false,
        })
    }
    scan(&doc.nodes)
}

/// Add the `mso` conditional reset block to the end of `<head>` unless one
/// exists. Markup without a head is left alone; it gets one when wrapped
/// for rendering.
pub fn inject_mso_block(doc: &mut Document) -> bool {
    if has_mso_block(doc) {
        return false;
    }
    let Some(head) = doc.find_mut("head") else {
        return false;
    };
    head.children.push(Node::Comment(MSO_BLOCK.to_string()));
    true
}

/// [`inject_mso_block`] over serialized markup.
#[must_use]
pub fn with_mso_block(html: &str) -> String {
    let mut doc = Document::parse(html);
    if inject_mso_block(&mut doc) {
        doc.to_html()
    } else {
        html.to_string()
    }
}

/// Apply the Word-engine approximation to already transformed markup.
#[must_use]
pub fn simulate_word(html: &str) -> TransformOutput {
    let mut doc = Document::parse(html);
    let mut warnings = detect_unsupported(&doc);

    let inlined = inline_styles(&mut doc, InlineOptions::WORD);
    let diff = strip_denylisted(&mut doc);
    let injected = inject_mso_block(&mut doc);

    if LAYOUT_DISPLAY.is_match(html) {
        warnings.push(Warning::new(
            WarningKind::Compatibility,
            Severity::Warning,
            LAYOUT_SUMMARY,
        ));
    }

    tracing::debug!(
        target: "mailcompat.outlook",
        detected = warnings.len(),
        inlined,
        stripped = diff.modified_styles.len(),
        injected,
        "applied word engine simulation"
    );

    TransformOutput {
        html: doc.to_html(),
        warnings,
        diff,
    }
}

/// The fixed notice every simulated render carries.
#[must_use]
pub fn simulation_notice() -> Warning {
    Warning::new(WarningKind::Compatibility, Severity::Info, SIMULATION_NOTICE)
}
