//! Property-based checks of rule derivation and markup transformation.
//!
//! 1. **Severity mapping**: `n`, `a`, `u` map to error, warning, info; any
//!    other code maps to warning.
//! 2. **Unsupported set**: a property is hard-unsupported exactly when its
//!    latest support code is `n`.
//! 3. **Idempotence**: transforming the output again changes nothing and
//!    repeats only the non-destructive warnings.
//! 4. **Clean pass-through**: markup no rule matches comes back byte for byte.
//! 5. **Layout summary**: the Word simulation reports flex/grid stripping
//!    once, however many declarations it strips.
//! 6. **Word simulation**: arbitrary markup leaves no denylisted declaration
//!    behind, and simulating the output again changes nothing.
//!
//! Generated markup mixes `<style>` blocks with inline styles and carries
//! non-ASCII text and values. It is written in the serializer's canonical
//! form so pass-through can be checked byte for byte.

use std::collections::BTreeSet;

use mailcompat::outlook::{LAYOUT_SUMMARY, is_denylisted, simulate_word};
use mailcompat::rules::build_client_compatibility;
use mailcompat::transform::transform;
use mailcompat::html::{Document, Node};
use mailcompat::{ClientId, ClientRules, Dataset, Severity};
use proptest::prelude::*;
use serde_json::{Map, Value, json};

// ── Fixtures ────────────────────────────────────────────────────────────

const CODES: [&str; 4] = ["y", "n", "a", "u"];
const LAYOUTS: [&str; 4] = ["flex", "grid", "inline-flex", "inline-grid"];

fn gmail_rules() -> ClientRules {
    let dataset = Dataset::from_value(json!({
        "data": [
            { "slug": "css-position", "title": "position", "category": "css",
              "stats": { "gmail": { "desktop-webmail": { "2023-10": "n" } } } },
            { "slug": "css-opacity", "title": "opacity", "category": "css",
              "stats": { "gmail": { "desktop-webmail": { "2023-10": "a" } } } },
            { "slug": "css-color", "title": "color", "category": "css",
              "stats": { "gmail": { "desktop-webmail": { "2023-10": "y" } } } },
            { "slug": "html-video", "title": "<video>", "category": "html",
              "stats": { "gmail": { "desktop-webmail": { "2023-10": "n" } } } }
        ]
    }))
    .expect("fixture dataset");
    ClientRules::build(&dataset, ClientId::GmailWeb)
}

fn style_attr(declarations: &[&str]) -> String {
    if declarations.is_empty() {
        String::new()
    } else {
        format!(" style=\"{}\"", declarations.join("; "))
    }
}

fn leaf(
    tags: &'static [&'static str],
    declarations: &'static [&'static str],
) -> BoxedStrategy<String> {
    (
        prop::sample::select(tags),
        prop::collection::vec(prop::sample::select(declarations), 0..3),
        "[a-zé日本]{0,6}",
    )
        .prop_map(|(tag, decls, text)| format!("<{tag}{}>{text}</{tag}>", style_attr(&decls)))
        .boxed()
}

fn style_block(declarations: &'static [&'static str]) -> BoxedStrategy<String> {
    (
        prop::sample::select(&["p", "span", ".c", "div p"][..]),
        prop::collection::vec(prop::sample::select(declarations), 1..3),
    )
        .prop_map(|(selector, decls)| {
            format!("<style>{selector} {{ {} }}</style>", decls.join("; "))
        })
        .boxed()
}

fn markup(
    tags: &'static [&'static str],
    declarations: &'static [&'static str],
) -> BoxedStrategy<String> {
    let container = (
        prop::collection::vec(prop::sample::select(declarations), 0..3),
        prop::collection::vec(leaf(tags, declarations), 0..4),
    )
        .prop_map(|(decls, children)| {
            format!("<div{}>{}</div>", style_attr(&decls), children.concat())
        });

    prop::collection::vec(
        prop_oneof![
            3 => leaf(tags, declarations),
            2 => container,
            1 => style_block(declarations),
        ],
        1..5,
    )
    .prop_map(|parts| parts.concat())
    .boxed()
}

fn any_markup() -> BoxedStrategy<String> {
    markup(
        &["p", "span", "video"],
        &[
            "color: red",
            "margin: 0",
            "position: absolute",
            "opacity: 0.5",
            "border-radius: 2px",
            "font-family: メイリオ",
        ],
    )
}

fn clean_markup() -> BoxedStrategy<String> {
    markup(
        &["p", "span"],
        &["color: red", "margin: 0", "padding: 4px", "font-family: メイリオ"],
    )
}

fn style_values(nodes: &[Node], out: &mut Vec<String>) {
    for node in nodes {
        if let Node::Element(element) = node {
            if let Some(style) = element.attr("style") {
                out.push(style.to_string());
            }
            style_values(&element.children, out);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 1-2. Rule derivation
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn severity_follows_support_code(code in "[a-z]{0,3}") {
        let expected = match code.as_str() {
            "n" => Severity::Error,
            "u" => Severity::Info,
            _ => Severity::Warning,
        };
        prop_assert_eq!(Severity::from_support_code(&code), expected);
    }

    #[test]
    fn unsupported_set_matches_n_codes(
        codes in prop::collection::vec(prop::sample::select(CODES.to_vec()), 1..10),
    ) {
        let entries: Vec<Value> = codes
            .iter()
            .enumerate()
            .map(|(index, code)| {
                let mut versions = Map::new();
                versions.insert("2023-10".to_string(), Value::from(*code));
                json!({
                    "slug": format!("css-prop-{index}"),
                    "title": format!("prop-{index}"),
                    "category": "css",
                    "stats": { "outlook": { "windows": versions } }
                })
            })
            .collect();
        let dataset = Dataset::from_value(json!({ "data": entries })).expect("dataset");
        let compat = build_client_compatibility(&dataset, ClientId::OutlookWin);

        let expected: BTreeSet<String> = codes
            .iter()
            .enumerate()
            .filter(|(_, code)| **code == "n")
            .map(|(index, _)| format!("prop-{index}"))
            .collect();
        prop_assert_eq!(&compat.unsupported_properties, &expected);

        let flagged = codes.iter().filter(|code| **code != "y").count();
        prop_assert_eq!(compat.rules.len(), flagged);
        for rule in &compat.rules {
            prop_assert!(
                rule.severity != Severity::Error
                    || expected.iter().any(|name| rule.pattern.matches_property(name))
            );
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3-4. Transformation
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn transform_is_idempotent(html in any_markup()) {
        let rules = gmail_rules();
        let first = transform(&html, &rules);
        let second = transform(&first.html, &rules);

        prop_assert_eq!(&second.html, &first.html);
        let expected: Vec<_> = first
            .warnings
            .iter()
            .filter(|warning| !warning.is_destructive())
            .cloned()
            .collect();
        prop_assert_eq!(second.warnings, expected);
        prop_assert!(second.diff.is_empty());
        prop_assert!(!first.html.contains("<video"));
        prop_assert!(!first.html.contains("position"));
    }

    #[test]
    fn clean_markup_passes_through(html in clean_markup()) {
        let out = transform(&html, &gmail_rules());
        prop_assert_eq!(&out.html, &html);
        prop_assert!(out.warnings.is_empty());
        prop_assert!(out.diff.is_empty());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Word simulation
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn layout_summary_is_reported_once(
        layouts in prop::collection::vec(prop::sample::select(LAYOUTS.to_vec()), 1..8),
    ) {
        let html: String = layouts
            .iter()
            .map(|layout| format!("<div style=\"display: {layout}; color: red\">x</div>"))
            .collect();
        let out = simulate_word(&html);

        let summaries = out
            .warnings
            .iter()
            .filter(|warning| warning.message == LAYOUT_SUMMARY)
            .count();
        prop_assert_eq!(summaries, 1);
        let display = out
            .warnings
            .iter()
            .filter(|warning| warning.property.as_deref() == Some("display"))
            .count();
        prop_assert_eq!(display, 1);
        prop_assert!(!out.html.contains("display"));
        prop_assert_eq!(out.html.matches("style=\"color: red\"").count(), layouts.len());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Word simulation over arbitrary markup
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn word_simulation_strips_denylist_and_settles(html in any_markup()) {
        let first = simulate_word(&html);

        let mut styles = Vec::new();
        style_values(&Document::parse(&first.html).nodes, &mut styles);
        for style in &styles {
            for declaration in style.split(';') {
                prop_assert!(!is_denylisted(declaration), "left {declaration:?} in {style:?}");
            }
        }
        prop_assert!(!first.html.contains("<style"));

        let second = simulate_word(&first.html);
        prop_assert_eq!(&second.html, &first.html);
        prop_assert!(second.diff.is_empty());
    }
}
