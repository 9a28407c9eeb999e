//! Per-client rendering: transform, simulate where needed, then wrap the
//! markup with the client's default stylesheet.

use serde::{Deserialize, Serialize};

use crate::client::{ClientId, EngineKind};
use crate::html::{Document, Element, Node};
use crate::outlook::{simulate_word, simulation_notice, with_mso_block};
use crate::rules::ClientRules;
use crate::transform::transform;
use crate::warning::{DomDiff, Warning};

const GMAIL_RESETS: &str = "
  * { box-sizing: border-box; }
  body { margin: 0; padding: 0; font-family: Arial, Helvetica, sans-serif; font-size: 14px; line-height: 1.5; color: #222; background-color: #fff; }
  img { max-width: 100%; height: auto; border: 0; }
  a { color: #1a0dab; text-decoration: underline; }
  table { border-collapse: collapse; }
  h1, h2, h3, h4, h5, h6 { margin: 0 0 16px; font-weight: bold; }
  p { margin: 0 0 16px; }
";

const APPLE_MAIL_RESETS: &str = "
  * { box-sizing: border-box; }
  body { margin: 0; padding: 0; font-family: -apple-system, BlinkMacSystemFont, 'Helvetica Neue', Helvetica, Arial, sans-serif; font-size: 14px; line-height: 1.5; color: #000; background-color: #fff; -webkit-font-smoothing: antialiased; }
  img { max-width: 100%; height: auto; border: 0; }
  a { color: #0068da; text-decoration: underline; }
  table { border-collapse: collapse; }
  h1, h2, h3, h4, h5, h6 { margin: 0 0 16px; font-weight: bold; }
  p { margin: 0 0 16px; }
";

const YAHOO_MAIL_RESETS: &str = "
  * { box-sizing: border-box; }
  body { margin: 0; padding: 0; font-family: Arial, Helvetica, sans-serif; font-size: 14px; line-height: 1.5; color: #222; background-color: #fff; }
  img { max-width: 100%; height: auto; border: 0; }
  a { color: #720e9e; text-decoration: underline; }
  table { border-collapse: collapse; }
  h1, h2, h3, h4, h5, h6 { margin: 0 0 16px; font-weight: bold; }
  p { margin: 0 0 16px; }
";

const OUTLOOK_RESETS: &str = "
  body { margin: 0; padding: 0; font-family: Calibri, Arial, sans-serif; font-size: 11pt; line-height: 1.5; }
  table { border-collapse: collapse; }
  img { -ms-interpolation-mode: bicubic; }
";

/// Default stylesheet the client applies around message content.
#[must_use]
pub const fn css_resets(client: ClientId) -> &'static str {
    match client {
        ClientId::GmailWeb => GMAIL_RESETS,
        ClientId::AppleMail => APPLE_MAIL_RESETS,
        ClientId::OutlookWin => OUTLOOK_RESETS,
        ClientId::YahooMail => YAHOO_MAIL_RESETS,
    }
}

/// Append a `<style>` with `resets` to `<head>`, or build a document shell
/// around fragment markup.
#[must_use]
pub fn wrap_with_resets(html: &str, resets: &str) -> String {
    let mut doc = Document::parse(html);
    if let Some(head) = doc.find_mut("head") {
        let mut style = Element::new("style");
        style.set_text(resets);
        head.children.push(Node::Element(style));
        return doc.to_html();
    }

    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><style>{resets}</style></head>\
         <body>{html}</body></html>"
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResult {
    pub client_id: ClientId,
    pub engine: EngineKind,
    pub final_html: String,
    pub warnings: Vec<Warning>,
    #[serde(default)]
    pub diff: DomDiff,
}

/// Render `html` as `rules.css.client_id` would receive it.
#[must_use]
pub fn render(html: &str, rules: &ClientRules) -> RenderResult {
    let client = rules.css.client_id;
    let transformed = transform(html, rules);

    let (markup, warnings, diff) = if client.is_simulated() {
        let simulated = simulate_word(&transformed.html);
        let mut warnings = vec![simulation_notice()];
        warnings.extend(transformed.warnings);
        warnings.extend(simulated.warnings);
        let mut diff = transformed.diff;
        diff.extend(simulated.diff);
        (simulated.html, warnings, diff)
    } else {
        (transformed.html, transformed.warnings, transformed.diff)
    };

    tracing::debug!(
        target: "mailcompat.engine",
        client = %client,
        renderer = client.renderer_name(),
        warnings = warnings.len(),
        "rendered client view"
    );

    let mut final_html = wrap_with_resets(&markup, css_resets(client));
    if client.is_simulated() {
        final_html = with_mso_block(&final_html);
    }

    RenderResult {
        client_id: client,
        engine: client.engine(),
        final_html,
        warnings,
        diff,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{css_resets, render, wrap_with_resets};
    use crate::client::{ClientId, EngineKind};
    use crate::outlook::SIMULATION_NOTICE;
    use crate::rules::{ClientCompatibility, ClientRules};
    use crate::warning::Severity;

    fn empty_rules(client: ClientId) -> ClientRules {
        ClientRules {
            css: ClientCompatibility {
                client_id: client,
                unsupported_properties: BTreeSet::new(),
                rules: Vec::new(),
            },
            html: Vec::new(),
        }
    }

    #[test]
    fn resets_go_into_existing_head() {
        let wrapped = wrap_with_resets(
            "<html><head><title>t</title></head><body></body></html>",
            "p{}",
        );
        assert_eq!(
            wrapped,
            "<html><head><title>t</title><style>p{}</style></head><body></body></html>"
        );
    }

    #[test]
    fn fragments_get_a_document_shell() {
        let wrapped = wrap_with_resets("<p>x</p>", "p{}");
        assert!(wrapped.starts_with("<!DOCTYPE html>"));
        assert!(wrapped.contains("<style>p{}</style>"));
        assert!(wrapped.contains("<body><p>x</p></body>"));
    }

    #[test]
    fn outlook_render_leads_with_simulation_notice() {
        let result = render("<p>x</p>", &empty_rules(ClientId::OutlookWin));
        assert_eq!(result.engine, EngineKind::Word);
        assert_eq!(result.warnings[0].message, SIMULATION_NOTICE);
        assert_eq!(result.warnings[0].severity, Severity::Info);
        assert!(result.final_html.contains("-ms-interpolation-mode"));

        let head = result.final_html.split("</head>").next().expect("head");
        assert_eq!(head.matches("[if mso]").count(), 1);
        assert!(!result.final_html.contains("<body><!--"));
    }

    #[test]
    fn chromium_render_has_no_simulation_artifacts() {
        let result = render("<p>x</p>", &empty_rules(ClientId::GmailWeb));
        assert!(result.warnings.is_empty());
        assert!(!result.final_html.contains("[if mso]"));
        assert!(result.final_html.contains(css_resets(ClientId::GmailWeb)));
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["clientId"], "gmail-web");
        assert!(json["finalHtml"].is_string());
    }
}
