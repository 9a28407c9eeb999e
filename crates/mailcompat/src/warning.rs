//! Warning trail and removal ledger types.

use serde::{Deserialize, Serialize};

/// What kind of modification or finding a warning describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    RemovedNode,
    RemovedAttribute,
    UnsupportedCss,
    Compatibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Map a caniemail support code to a severity.
    ///
    /// `n` is an error, `a` a warning, `u` informational; anything else
    /// defaults to a warning.
    #[must_use]
    pub fn from_support_code(code: &str) -> Self {
        match code {
            "n" => Self::Error,
            "a" => Self::Warning,
            "u" => Self::Info,
            _ => Self::Warning,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

impl Warning {
    #[must_use]
    pub fn new(kind: WarningKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            selector: None,
            property: None,
        }
    }

    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Whether the warning records content that was taken out of the markup.
    #[must_use]
    pub fn is_destructive(&self) -> bool {
        match self.kind {
            WarningKind::RemovedNode | WarningKind::RemovedAttribute => true,
            WarningKind::UnsupportedCss => self.severity == Severity::Error,
            WarningKind::Compatibility => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedNode {
    pub tag_name: String,
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedAttribute {
    pub element: String,
    pub attribute: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedStyle {
    pub selector: String,
    pub property: String,
    pub original_value: String,
    pub new_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Ledger of what a transformation pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomDiff {
    pub removed_nodes: Vec<RemovedNode>,
    pub removed_attributes: Vec<RemovedAttribute>,
    pub modified_styles: Vec<ModifiedStyle>,
}

impl DomDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed_nodes.is_empty()
            && self.removed_attributes.is_empty()
            && self.modified_styles.is_empty()
    }

    pub fn extend(&mut self, other: Self) {
        self.removed_nodes.extend(other.removed_nodes);
        self.removed_attributes.extend(other.removed_attributes);
        self.modified_styles.extend(other.modified_styles);
    }
}
