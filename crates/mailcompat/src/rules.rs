//! Per-client compatibility rules derived from the dataset.
//!
//! CSS features become property rules keyed by the slug minus its `css-`
//! prefix. HTML features become element rules keyed by the tag named in the
//! feature title. Rules keep dataset order and the first match wins.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::client::ClientId;
use crate::dataset::{Dataset, DatasetSnapshot, Feature, FeatureCategory, SupportStatus};
use crate::warning::Severity;

const CSS_SLUG_PREFIX: &str = "css-";

/// What a rule matches against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum RulePattern {
    /// Exact match on a normalized `property:` token.
    Property(String),
    /// Match on an element's opening tag.
    Element(String),
}

impl RulePattern {
    #[must_use]
    pub fn matches_property(&self, property: &str) -> bool {
        match self {
            Self::Property(name) => name.eq_ignore_ascii_case(property.trim()),
            Self::Element(_) => false,
        }
    }

    #[must_use]
    pub fn matches_element(&self, tag: &str) -> bool {
        match self {
            Self::Element(name) => name.eq_ignore_ascii_case(tag),
            Self::Property(_) => false,
        }
    }

    #[must_use]
    pub fn element_name(&self) -> Option<&str> {
        match self {
            Self::Element(name) => Some(name),
            Self::Property(_) => None,
        }
    }
}

impl fmt::Display for RulePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(name) => write!(f, "{name}:"),
            Self::Element(name) => write!(f, "<{name}>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityRule {
    pub pattern: RulePattern,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCompatibility {
    pub client_id: ClientId,
    /// Normalized names of properties rated `n`.
    pub unsupported_properties: BTreeSet<String>,
    pub rules: Vec<CompatibilityRule>,
}

impl ClientCompatibility {
    #[must_use]
    pub fn is_unsupported(&self, property: &str) -> bool {
        self.unsupported_properties
            .contains(&normalize_property(property))
    }

    /// First rule whose pattern matches `property`.
    #[must_use]
    pub fn rule_for(&self, property: &str) -> Option<&CompatibilityRule> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches_property(property))
    }

    /// First matching rule that flags a degraded-but-kept property.
    #[must_use]
    pub fn warning_rule_for(&self, property: &str) -> Option<&CompatibilityRule> {
        self.rules.iter().find(|rule| {
            rule.severity == Severity::Warning && rule.pattern.matches_property(property)
        })
    }
}

/// Everything the transformer needs for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRules {
    pub css: ClientCompatibility,
    pub html: Vec<CompatibilityRule>,
}

impl ClientRules {
    #[must_use]
    pub fn build(dataset: &Dataset, client: ClientId) -> Self {
        Self {
            css: build_client_compatibility(dataset, client),
            html: build_html_rules(dataset, client),
        }
    }

    /// CSS rules followed by HTML rules.
    pub fn all_rules(&self) -> impl Iterator<Item = &CompatibilityRule> {
        self.css.rules.iter().chain(self.html.iter())
    }
}

#[must_use]
pub fn normalize_property(property: &str) -> String {
    property.trim().to_ascii_lowercase()
}

/// `css-border-radius` → `border-radius`. Non-CSS slugs yield `None`.
#[must_use]
pub fn property_from_slug(slug: &str) -> Option<String> {
    let property = slug.strip_prefix(CSS_SLUG_PREFIX)?;
    (!property.is_empty()).then(|| property.to_ascii_lowercase())
}

/// `<video>` → `video`. Titles that do not name a single tag yield `None`.
#[must_use]
pub fn element_from_title(title: &str) -> Option<String> {
    let trimmed = title.trim();
    let trimmed = trimmed.strip_prefix('<').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('>').unwrap_or(trimmed);
    let name = trimmed.to_ascii_lowercase();

    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|ch| ch.is_ascii_alphabetic())
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '-');
    valid.then_some(name)
}

fn support_phrase(status: SupportStatus) -> &'static str {
    match status {
        SupportStatus::Unsupported => "is not supported in",
        SupportStatus::Partial => "has partial support in",
        SupportStatus::Supported | SupportStatus::Unknown => "support is unknown in",
    }
}

fn compose_message(
    subject: &str,
    feature: &Feature,
    client: ClientId,
    status: SupportStatus,
    note_refs: &[String],
) -> String {
    let mut message = format!(
        "{subject} {} {}",
        support_phrase(status),
        client.vendor_name()
    );
    let notes = feature.note_texts(note_refs);
    if !notes.is_empty() {
        message.push_str(". ");
        message.push_str(&notes.join(" "));
    }
    message
}

/// Build the CSS rule set and hard-unsupported property set for `client`.
#[must_use]
pub fn build_client_compatibility(dataset: &Dataset, client: ClientId) -> ClientCompatibility {
    let mut unsupported_properties = BTreeSet::new();
    let mut rules = Vec::new();
    let mut processed = 0_usize;
    let mut fallbacks = 0_usize;

    for feature in &dataset.features {
        if feature.category() != FeatureCategory::Css {
            continue;
        }
        processed += 1;

        let Some(support) = feature.support_for(client) else {
            continue;
        };
        if support.code.status == SupportStatus::Supported {
            continue;
        }
        let Some(property) = property_from_slug(&feature.slug) else {
            continue;
        };
        fallbacks += usize::from(support.via_fallback);

        let status = support.code.status;
        if status == SupportStatus::Unsupported {
            unsupported_properties.insert(property.clone());
        }
        let subject = format!("CSS property \"{}\"", feature.title);
        rules.push(CompatibilityRule {
            pattern: RulePattern::Property(property),
            message: compose_message(&subject, feature, client, status, &support.code.note_refs),
            severity: Severity::from_support_code(status.code()),
        });
    }

    tracing::debug!(
        target: "mailcompat.rules",
        client = %client,
        processed,
        rules = rules.len(),
        unsupported = unsupported_properties.len(),
        fallbacks,
        "built css compatibility"
    );

    ClientCompatibility {
        client_id: client,
        unsupported_properties,
        rules,
    }
}

/// Build element rules for `client` from `html` features.
#[must_use]
pub fn build_html_rules(dataset: &Dataset, client: ClientId) -> Vec<CompatibilityRule> {
    let mut rules = Vec::new();

    for feature in &dataset.features {
        if feature.category() != FeatureCategory::Html {
            continue;
        }
        let Some(support) = feature.support_for(client) else {
            continue;
        };
        if support.code.status == SupportStatus::Supported {
            continue;
        }
        let Some(element) = element_from_title(&feature.title) else {
            tracing::trace!(
                target: "mailcompat.rules",
                slug = %feature.slug,
                title = %feature.title,
                "html feature title does not name an element"
            );
            continue;
        };

        let status = support.code.status;
        let subject = format!("HTML element \"{element}\"");
        rules.push(CompatibilityRule {
            message: compose_message(&subject, feature, client, status, &support.code.note_refs),
            pattern: RulePattern::Element(element),
            severity: Severity::from_support_code(status.code()),
        });
    }

    tracing::debug!(
        target: "mailcompat.rules",
        client = %client,
        rules = rules.len(),
        "built html compatibility rules"
    );
    rules
}

#[derive(Debug)]
struct Memo {
    generation: u64,
    rules: Arc<ClientRules>,
}

/// Lazily built, per-client rules tied to one dataset generation.
///
/// Rules for a client are built at most once per generation. A snapshot with
/// a newer generation drops every memo built from an older one.
#[derive(Debug, Default)]
pub struct CompatibilityStore {
    memo: Mutex<BTreeMap<ClientId, Memo>>,
}

impl CompatibilityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ClientId, Memo>> {
        self.memo.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rules for `client` under `snapshot`.
    ///
    /// The build runs outside the memo lock, so different clients build in
    /// parallel. A result built from a snapshot older than any memoized one
    /// is returned but not stored.
    pub fn rules_for(&self, snapshot: &DatasetSnapshot, client: ClientId) -> Arc<ClientRules> {
        if let Some(entry) = self
            .lock()
            .get(&client)
            .filter(|entry| entry.generation == snapshot.generation)
        {
            return Arc::clone(&entry.rules);
        }

        let built = Arc::new(ClientRules::build(&snapshot.dataset, client));

        let mut memo = self.lock();
        let newest = memo.values().map(|entry| entry.generation).max();
        if newest.is_some_and(|newest| newest > snapshot.generation) {
            tracing::debug!(
                target: "mailcompat.rules",
                client = %client,
                generation = snapshot.generation,
                "not memoizing rules from an outdated snapshot"
            );
            return built;
        }
        memo.retain(|_, entry| entry.generation >= snapshot.generation);
        if let Some(entry) = memo.get(&client) {
            // Built concurrently by another caller for the same generation.
            return Arc::clone(&entry.rules);
        }
        memo.insert(
            client,
            Memo {
                generation: snapshot.generation,
                rules: Arc::clone(&built),
            },
        );
        built
    }

    /// Number of clients with memoized rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
