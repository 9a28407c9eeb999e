//! caniemail feature dataset: decoding, support lookup, and the TTL cache.
//!
//! The dataset is fetched as one JSON document and cached process-wide. A
//! refresh swaps the whole snapshot atomically, so readers observe either the
//! previous dataset or the new one and never a mix of both.
//!
//! # Failure policy
//!
//! - Fresh snapshot: served without touching the network.
//! - Expired snapshot and fetch fails: the stale snapshot is served.
//! - No snapshot and fetch fails: [`EngineError::DatasetUnavailable`].
//!
//! Only one fetch runs at a time. Callers that queue behind an in-flight
//! fetch take its outcome instead of issuing their own request.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{ClientId, StatsKey};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// version → support code
pub type VersionStats = BTreeMap<String, String>;
/// family → platform → version → support code
pub type FeatureStats = BTreeMap<String, BTreeMap<String, VersionStats>>;

// ── Support codes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupportStatus {
    #[serde(rename = "y")]
    Supported,
    #[serde(rename = "n")]
    Unsupported,
    #[serde(rename = "a")]
    Partial,
    #[serde(rename = "u")]
    Unknown,
}

impl SupportStatus {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Supported => "y",
            Self::Unsupported => "n",
            Self::Partial => "a",
            Self::Unknown => "u",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "y" => Some(Self::Supported),
            "n" => Some(Self::Unsupported),
            "a" => Some(Self::Partial),
            "u" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// A parsed support value such as `a #1 #3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportCode {
    pub status: SupportStatus,
    /// Note numbers without the leading `#`.
    pub note_refs: Vec<String>,
}

impl SupportCode {
    /// Parse a raw stats value. Returns `None` for anything that does not
    /// start with a single status letter.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split_whitespace();
        let status = SupportStatus::from_code(parts.next()?)?;
        let note_refs = parts
            .filter_map(|part| part.strip_prefix('#'))
            .filter(|num| !num.is_empty())
            .map(str::to_string)
            .collect();
        Some(Self { status, note_refs })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum VersionToken<'a> {
    Number(u64),
    Text(&'a str),
}

fn version_tokens(raw: &str) -> Vec<VersionToken<'_>> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let bytes = raw.as_bytes();
    while start < bytes.len() {
        let numeric = bytes[start].is_ascii_digit();
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() == numeric {
            end += 1;
        }
        let chunk = &raw[start..end];
        if numeric {
            match chunk.parse::<u64>() {
                Ok(value) => tokens.push(VersionToken::Number(value)),
                Err(_) => tokens.push(VersionToken::Text(chunk)),
            }
        } else if !chunk.chars().all(|ch| ch == '.' || ch == '-' || ch == ' ') {
            tokens.push(VersionToken::Text(chunk));
        }
        start = end;
    }
    tokens
}

/// Order version keys so that `16` sorts above `9` and `2023-10` above
/// `2019-01`. Equal tokenizations fall back to plain string order.
#[must_use]
pub fn compare_versions(left: &str, right: &str) -> CmpOrdering {
    version_tokens(left)
        .cmp(&version_tokens(right))
        .then_with(|| left.cmp(right))
}

/// Greatest version key of a platform's stats and its raw value.
#[must_use]
pub fn latest_version(stats: &VersionStats) -> Option<(&str, &str)> {
    stats
        .iter()
        .max_by(|(a, _), (b, _)| compare_versions(a, b))
        .map(|(version, value)| (version.as_str(), value.as_str()))
}

// ── Features ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureCategory {
    Css,
    Html,
    Other,
}

/// One entry of the caniemail dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub notes_by_num: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub stats: FeatureStats,
}

/// Support of one feature for one client, after fallback resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSupport {
    pub key: StatsKey,
    pub via_fallback: bool,
    pub version: String,
    pub code: SupportCode,
}

impl Feature {
    #[must_use]
    pub fn category(&self) -> FeatureCategory {
        match self.category.as_str() {
            "css" => FeatureCategory::Css,
            "html" => FeatureCategory::Html,
            _ => FeatureCategory::Other,
        }
    }

    #[must_use]
    pub fn platform_stats(&self, key: StatsKey) -> Option<&VersionStats> {
        self.stats.get(key.family)?.get(key.platform)
    }

    /// Feature-level notes followed by the texts of `note_refs`, skipping
    /// references that have no text.
    #[must_use]
    pub fn note_texts(&self, note_refs: &[String]) -> Vec<&str> {
        let mut notes = Vec::new();
        if let Some(notes_text) = self.notes.as_deref().filter(|text| !text.is_empty()) {
            notes.push(notes_text);
        }
        if let Some(by_num) = &self.notes_by_num {
            notes.extend(
                note_refs
                    .iter()
                    .filter_map(|num| by_num.get(num))
                    .map(String::as_str),
            );
        }
        notes
    }

    /// Resolve the latest support code for `client`, trying the profile's
    /// fallback keys when the primary pair is missing.
    ///
    /// `None` means "no data": the feature contributes nothing for this
    /// client. A malformed support value is treated the same way.
    #[must_use]
    pub fn support_for(&self, client: ClientId) -> Option<ResolvedSupport> {
        let profile = client.profile();
        let Some((key, stats)) = profile
            .keys()
            .find_map(|key| self.platform_stats(key).map(|stats| (key, stats)))
        else {
            tracing::trace!(
                target: "mailcompat.dataset",
                client = %client,
                slug = %self.slug,
                families = ?self.stats.keys().collect::<Vec<_>>(),
                "no support data for client"
            );
            return None;
        };

        let via_fallback = key != profile.primary;
        if via_fallback {
            tracing::debug!(
                target: "mailcompat.dataset",
                client = %client,
                slug = %self.slug,
                fallback = %key,
                "resolved support through fallback key"
            );
        }

        let (version, raw) = latest_version(stats)?;
        let Some(code) = SupportCode::parse(raw) else {
            tracing::warn!(
                target: "mailcompat.dataset",
                client = %client,
                slug = %self.slug,
                version,
                raw,
                "unparseable support value"
            );
            return None;
        };

        Some(ResolvedSupport {
            key,
            via_fallback,
            version: version.to_string(),
            code,
        })
    }
}

// ── Dataset ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub api_version: String,
    pub last_update_date: String,
    pub features: Vec<Feature>,
    /// Entries dropped because they did not decode as a [`Feature`].
    pub skipped: usize,
}

impl Dataset {
    /// Decode a caniemail payload. Each `data` entry decodes independently;
    /// malformed entries are counted in [`Dataset::skipped`] and dropped.
    pub fn from_value(payload: Value) -> Result<Self> {
        let Value::Object(mut root) = payload else {
            return Err(EngineError::unavailable("dataset payload is not a JSON object"));
        };
        let Some(Value::Array(entries)) = root.remove("data") else {
            return Err(EngineError::unavailable("dataset payload has no `data` array"));
        };

        let text_field = |name: &str| {
            root.get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let api_version = text_field("api_version");
        let last_update_date = text_field("last_update_date");

        let mut features = Vec::with_capacity(entries.len());
        let mut skipped = 0;
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<Feature>(entry) {
                Ok(feature) => features.push(feature),
                Err(error) => {
                    skipped += 1;
                    tracing::warn!(
                        target: "mailcompat.dataset",
                        index,
                        error = %error,
                        "skipping malformed dataset entry"
                    );
                }
            }
        }

        Ok(Self {
            api_version,
            last_update_date,
            features,
            skipped,
        })
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(raw)?)
    }

    #[must_use]
    pub fn feature(&self, slug: &str) -> Option<&Feature> {
        self.features.iter().find(|feature| feature.slug == slug)
    }

    /// Lookup by client and feature slug.
    #[must_use]
    pub fn support(&self, client: ClientId, slug: &str) -> Option<ResolvedSupport> {
        self.feature(slug)?.support_for(client)
    }
}

// ── Sources ──────────────────────────────────────────────────────────────

/// Where the dataset comes from. Production uses [`HttpDatasetSource`].
pub trait DatasetSource: Send + Sync {
    fn fetch(&self) -> Result<Dataset>;
}

/// Single GET against the configured JSON endpoint.
#[derive(Debug)]
pub struct HttpDatasetSource {
    client: Client,
    url: String,
}

impl HttpDatasetSource {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            url: config.dataset_url.clone(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl DatasetSource for HttpDatasetSource {
    fn fetch(&self) -> Result<Dataset> {
        tracing::debug!(target: "mailcompat.dataset", url = %self.url, "fetching dataset");
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::unavailable(format!(
                "GET {} returned {status}",
                self.url
            )));
        }

        let payload: Value = response.json()?;
        let dataset = Dataset::from_value(payload)?;
        tracing::debug!(
            target: "mailcompat.dataset",
            features = dataset.features.len(),
            skipped = dataset.skipped,
            api_version = %dataset.api_version,
            "dataset fetched"
        );
        Ok(dataset)
    }
}

// ── Cache ────────────────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// An immutable cached dataset plus the bookkeeping that keys derived data.
#[derive(Debug, Clone)]
pub struct DatasetSnapshot {
    pub dataset: Arc<Dataset>,
    pub fetched_at: Instant,
    /// Increments on every successful refresh.
    pub generation: u64,
}

#[derive(Debug, Default)]
struct FetchGate {
    last_failure: Option<String>,
}

pub struct DatasetCache {
    source: Box<dyn DatasetSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    snapshot: ArcSwapOption<DatasetSnapshot>,
    attempts: AtomicU64,
    gate: Mutex<FetchGate>,
}

impl std::fmt::Debug for DatasetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetCache")
            .field("ttl", &self.ttl)
            .field("attempts", &self.attempts.load(Ordering::Relaxed))
            .field("cached", &self.snapshot.load().is_some())
            .finish_non_exhaustive()
    }
}

impl DatasetCache {
    #[must_use]
    pub fn new(source: Box<dyn DatasetSource>, ttl: Duration) -> Self {
        Self::with_clock(source, ttl, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        source: Box<dyn DatasetSource>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            clock,
            ttl,
            snapshot: ArcSwapOption::empty(),
            attempts: AtomicU64::new(0),
            gate: Mutex::new(FetchGate::default()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of fetch attempts made so far, successful or not.
    #[must_use]
    pub fn fetch_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Current snapshot without fetching, fresh or not.
    #[must_use]
    pub fn cached(&self) -> Option<DatasetSnapshot> {
        self.snapshot
            .load_full()
            .map(|snapshot| DatasetSnapshot::clone(&snapshot))
    }

    pub fn get_dataset(&self) -> Result<Arc<Dataset>> {
        self.get().map(|snapshot| snapshot.dataset)
    }

    pub fn get(&self) -> Result<DatasetSnapshot> {
        if let Some(fresh) = self.fresh_snapshot() {
            return Ok(fresh);
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let mut gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());

        if self.attempts.load(Ordering::Acquire) != seen {
            // Another caller finished a fetch while we waited on the gate.
            return match self.cached() {
                Some(snapshot) => Ok(snapshot),
                None => Err(EngineError::unavailable(
                    gate.last_failure
                        .clone()
                        .unwrap_or_else(|| "dataset fetch failed".to_string()),
                )),
            };
        }
        if let Some(fresh) = self.fresh_snapshot() {
            return Ok(fresh);
        }

        let outcome = self.source.fetch();
        let result = match outcome {
            Ok(dataset) => {
                let generation = self
                    .cached()
                    .map_or(1, |previous| previous.generation + 1);
                let snapshot = DatasetSnapshot {
                    dataset: Arc::new(dataset),
                    fetched_at: self.clock.now(),
                    generation,
                };
                self.snapshot.store(Some(Arc::new(snapshot.clone())));
                gate.last_failure = None;
                tracing::debug!(
                    target: "mailcompat.dataset",
                    generation,
                    features = snapshot.dataset.features.len(),
                    "dataset cache replaced"
                );
                Ok(snapshot)
            }
            Err(error) => {
                let reason = error.to_string();
                gate.last_failure = Some(reason.clone());
                match self.cached() {
                    Some(stale) => {
                        tracing::warn!(
                            target: "mailcompat.dataset",
                            error = %reason,
                            generation = stale.generation,
                            "dataset fetch failed; serving cached copy"
                        );
                        Ok(stale)
                    }
                    None => {
                        tracing::warn!(
                            target: "mailcompat.dataset",
                            error = %reason,
                            "dataset fetch failed with no cached copy"
                        );
                        Err(EngineError::unavailable(reason))
                    }
                }
            }
        };
        self.attempts.fetch_add(1, Ordering::AcqRel);
        result
    }

    fn fresh_snapshot(&self) -> Option<DatasetSnapshot> {
        let guard = self.snapshot.load();
        let snapshot = (*guard).as_ref()?;
        let age = self.clock.now().saturating_duration_since(snapshot.fetched_at);
        (age < self.ttl).then(|| DatasetSnapshot::clone(snapshot))
    }
}
