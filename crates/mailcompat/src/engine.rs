//! The entry point collaborators hold: one dataset cache, one rule memo.

use std::sync::Arc;
use std::time::Duration;

use crate::analyse::{AnalysisResult, analyse};
use crate::client::ClientId;
use crate::config::EngineConfig;
use crate::dataset::{Clock, Dataset, DatasetCache, DatasetSource, HttpDatasetSource};
use crate::error::Result;
use crate::normalize::{NormalizeOptions, normalize_email};
use crate::render::{RenderResult, render};
use crate::rules::{ClientCompatibility, ClientRules, CompatibilityRule, CompatibilityStore};
use crate::transform::{TransformOutput, transform};

/// Shared, thread-safe compatibility engine.
///
/// Every operation that needs rules resolves them through the dataset cache,
/// so the first call may block on a network fetch and any call can fail with
/// [`crate::EngineError::DatasetUnavailable`] while no dataset has ever been
/// loaded.
#[derive(Debug)]
pub struct Engine {
    cache: DatasetCache,
    store: CompatibilityStore,
}

impl Engine {
    /// Engine backed by the HTTP dataset endpoint in `config`.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let source = HttpDatasetSource::new(config)?;
        tracing::debug!(
            target: "mailcompat.engine",
            url = %source.url(),
            ttl_secs = config.cache_ttl.as_secs(),
            "engine configured"
        );
        Ok(Self::with_source(Box::new(source), config.cache_ttl))
    }

    #[must_use]
    pub fn with_source(source: Box<dyn DatasetSource>, ttl: Duration) -> Self {
        Self::from_cache(DatasetCache::new(source, ttl))
    }

    #[must_use]
    pub fn with_clock(
        source: Box<dyn DatasetSource>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::from_cache(DatasetCache::with_clock(source, ttl, clock))
    }

    fn from_cache(cache: DatasetCache) -> Self {
        Self {
            cache,
            store: CompatibilityStore::new(),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    pub fn dataset(&self) -> Result<Arc<Dataset>> {
        self.cache.get_dataset()
    }

    /// Rules for `client`, rebuilt only when the dataset snapshot changes.
    pub fn rules(&self, client: ClientId) -> Result<Arc<ClientRules>> {
        let snapshot = self.cache.get()?;
        Ok(self.store.rules_for(&snapshot, client))
    }

    pub fn client_compatibility(&self, client: ClientId) -> Result<ClientCompatibility> {
        Ok(self.rules(client)?.css.clone())
    }

    pub fn html_rules(&self, client: ClientId) -> Result<Vec<CompatibilityRule>> {
        Ok(self.rules(client)?.html.clone())
    }

    pub fn transform(&self, html: &str, client: ClientId) -> Result<TransformOutput> {
        let rules = self.rules(client)?;
        Ok(transform(html, &rules))
    }

    pub fn render(&self, html: &str, client: ClientId) -> Result<RenderResult> {
        let rules = self.rules(client)?;
        Ok(render(html, &rules))
    }

    /// Render for each client in order. The first failure aborts the batch.
    pub fn render_all(&self, html: &str, clients: &[ClientId]) -> Result<Vec<RenderResult>> {
        let results = clients
            .iter()
            .map(|&client| self.render(html, client))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(
            target: "mailcompat.engine",
            clients = results.len(),
            "rendered all clients"
        );
        Ok(results)
    }

    /// Normalize `html` once with default options, then render the
    /// normalized markup for each client in order.
    pub fn render_email(&self, html: &str, clients: &[ClientId]) -> Result<Vec<RenderResult>> {
        self.render_email_with(html, clients, NormalizeOptions::default())
    }

    pub fn render_email_with(
        &self,
        html: &str,
        clients: &[ClientId],
        options: NormalizeOptions,
    ) -> Result<Vec<RenderResult>> {
        let normalized = normalize_email(html, options);
        self.render_all(&normalized.html, clients)
    }

    pub fn analyse(
        &self,
        original_html: &str,
        results: &[RenderResult],
    ) -> Result<Vec<AnalysisResult>> {
        analyse(original_html, results, |client| self.rules(client))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::Engine;
    use crate::client::ClientId;
    use crate::dataset::{Dataset, DatasetSource};
    use crate::error::{EngineError, Result};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
    }

    impl DatasetSource for CountingSource {
        fn fetch(&self) -> Result<Dataset> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Dataset::from_value(json!({
                "data": [
                    { "slug": "css-opacity", "title": "opacity", "category": "css",
                      "stats": { "gmail": { "desktop-webmail": { "2020": "n" } } } }
                ]
            }))
        }
    }

    struct FailingSource;

    impl DatasetSource for FailingSource {
        fn fetch(&self) -> Result<Dataset> {
            Err(EngineError::unavailable("offline"))
        }
    }

    #[test]
    fn rules_are_memoized_within_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = Engine::with_source(
            Box::new(CountingSource {
                calls: Arc::clone(&calls),
            }),
            Duration::from_secs(60),
        );
        let first = engine.rules(ClientId::GmailWeb).expect("rules");
        let second = engine.rules(ClientId::GmailWeb).expect("rules");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(first.css.is_unsupported("opacity"));
    }

    #[test]
    fn render_all_preserves_client_order() {
        let engine = Engine::with_source(
            Box::new(CountingSource {
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Duration::from_secs(60),
        );
        let clients = [ClientId::YahooMail, ClientId::GmailWeb, ClientId::OutlookWin];
        let results = engine
            .render_all("<p style=\"opacity:0.5\">x</p>", &clients)
            .expect("render all");
        let ids: Vec<_> = results.iter().map(|result| result.client_id).collect();
        assert_eq!(ids, clients);
        assert!(!results[1].final_html.contains("opacity"));
        assert!(results[0].final_html.contains("opacity:0.5"));
    }

    #[test]
    fn render_email_normalizes_before_transforming() {
        let engine = Engine::with_source(
            Box::new(CountingSource {
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            Duration::from_secs(60),
        );
        let results = engine
            .render_email(
                "<!-- draft --><style>p { opacity: 0.5; color: red }</style><p>x</p>",
                &[ClientId::GmailWeb],
            )
            .expect("render email");
        let html = &results[0].final_html;
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("name=\"viewport\""));
        assert!(html.contains("<p style=\"color: red\">x</p>"));
        assert!(!html.contains("draft"));
        assert!(!html.contains("opacity"));
    }

    #[test]
    fn unavailable_dataset_surfaces_from_every_operation() {
        let engine = Engine::with_source(Box::new(FailingSource), Duration::from_secs(60));
        assert!(matches!(
            engine.transform("<p>x</p>", ClientId::AppleMail),
            Err(EngineError::DatasetUnavailable { .. })
        ));
        assert!(matches!(
            engine.render_all("<p>x</p>", &ClientId::ALL),
            Err(EngineError::DatasetUnavailable { .. })
        ));
        assert!(matches!(
            engine.render_email("<p>x</p>", &[ClientId::GmailWeb]),
            Err(EngineError::DatasetUnavailable { .. })
        ));
    }
}
