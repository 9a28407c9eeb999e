//! Input normalization ahead of per-client rendering.

use serde::{Deserialize, Serialize};

use crate::html::{Document, Markup, Node};
use crate::inline::{InlineOptions, inline_styles};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub inline_styles: bool,
    pub remove_comments: bool,
    pub preserve_media_queries: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            inline_styles: true,
            remove_comments: true,
            preserve_media_queries: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEmail {
    pub html: String,
    pub original_html: String,
}

fn strip_comments(nodes: &mut Vec<Node>) -> usize {
    let before = nodes.len();
    nodes.retain(|node| !matches!(node, Node::Comment(_)));
    let mut removed = before - nodes.len();
    for node in nodes.iter_mut() {
        if let Node::Element(element) = node {
            removed += strip_comments(&mut element.children);
        }
    }
    removed
}

fn document_shell(fragment: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\
         </head><body>{fragment}</body></html>"
    )
}

/// Trim, optionally drop comments, wrap fragments in a full document, and
/// optionally inline stylesheet rules while leaving the blocks in place.
#[must_use]
pub fn normalize_email(html: &str, options: NormalizeOptions) -> NormalizedEmail {
    let mut doc = Document::parse(html.trim());

    let comments = if options.remove_comments {
        strip_comments(&mut doc.nodes)
    } else {
        0
    };

    let wrapped = doc.kind == Markup::Fragment;
    if wrapped {
        doc = Document::parse(&document_shell(&doc.to_html()));
    }

    let inlined = if options.inline_styles {
        let inline_options = InlineOptions {
            keep_media_queries: options.preserve_media_queries,
            ..InlineOptions::PRESERVE
        };
        inline_styles(&mut doc, inline_options)
    } else {
        0
    };

    tracing::debug!(
        target: "mailcompat.transform",
        comments,
        wrapped,
        inlined,
        "normalized email"
    );

    NormalizedEmail {
        html: doc.to_html(),
        original_html: html.to_string(),
    }
}
