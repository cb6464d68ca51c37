//! Extension point for host sources.
//!
//! A [`HostSource`] returns one page of raw host payloads per call. Paging,
//! batching and retry live in [`crate::connector::HostFetcher`], so a source
//! only has to speak its provider's wire format.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │            SourceRegistry            │
//! │  ┌─────────┐ ┌───────────┐ ┌──────┐  │
//! │  │ qualys  │ │crowdstrike│ │custom│  │
//! │  └─────────┘ └───────────┘ └──────┘  │
//! └─────────────────┬────────────────────┘
//!                   ▼
//!       HostFetcher → fetch stage
//! ```
//!
//! # Usage
//!
//! ```rust
//! use host_inventory::traits::SourceRegistry;
//!
//! let registry = SourceRegistry::builtin();
//! assert!(registry.find("qualys").is_some());
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::connector_crowdstrike::CrowdstrikeClient;
use crate::connector_qualys::QualysClient;
use crate::error::{PipelineError, Result};

/// A paginated upstream that lists hosts.
#[async_trait]
pub trait HostSource: Send + Sync {
    /// Source slug, e.g. `"qualys"`. Stamped on every fetched record.
    fn slug(&self) -> &str;

    /// Fetch up to `limit` host payloads starting at `offset`.
    ///
    /// A page shorter than `limit` means the upstream is exhausted. Errors
    /// for which [`PipelineError::is_transient`] holds are retried by the
    /// caller with the same `offset`.
    async fn fetch_page(&self, limit: u64, offset: u64) -> Result<Vec<Value>>;
}

/// Settings a [`HostSource`] is built from.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub slug: String,
    pub api_token: Option<String>,
    pub endpoint_url: Option<String>,
}

impl ClientConfig {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            api_token: None,
            endpoint_url: None,
        }
    }
}

/// Builds a source from its settings.
pub type SourceFactory = Arc<dyn Fn(ClientConfig) -> Result<Arc<dyn HostSource>> + Send + Sync>;

/// Wrap a typed constructor as a [`SourceFactory`].
pub fn factory<F, S>(build: F) -> SourceFactory
where
    F: Fn(ClientConfig) -> Result<S> + Send + Sync + 'static,
    S: HostSource + 'static,
{
    Arc::new(move |config: ClientConfig| -> Result<Arc<dyn HostSource>> {
        Ok(Arc::new(build(config)?))
    })
}

/// Slug → factory lookup used by the fetch stage.
///
/// [`SourceRegistry::builtin`] knows the shipped providers; tests and
/// embedders can [`register`](SourceRegistry::register) their own.
#[derive(Clone)]
pub struct SourceRegistry {
    factories: Vec<(String, SourceFactory)>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Registry with the `qualys` and `crowdstrike` connectors.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(crate::connector_qualys::SLUG, factory(QualysClient::new));
        registry.register(
            crate::connector_crowdstrike::SLUG,
            factory(CrowdstrikeClient::new),
        );
        registry
    }

    /// Register a factory. A later registration for the same slug wins.
    pub fn register(&mut self, slug: impl Into<String>, make: SourceFactory) {
        let slug = slug.into();
        self.factories.retain(|(s, _)| *s != slug);
        self.factories.push((slug, make));
    }

    pub fn find(&self, slug: &str) -> Option<&SourceFactory> {
        self.factories
            .iter()
            .find(|(s, _)| s == slug)
            .map(|(_, f)| f)
    }

    /// Build the source for `config.slug`.
    pub fn build(&self, config: ClientConfig) -> Result<Arc<dyn HostSource>> {
        let make = self.find(&config.slug).ok_or_else(|| {
            PipelineError::Config(format!("no connector registered for '{}'", config.slug))
        })?;
        make(config)
    }

    pub fn slugs(&self) -> Vec<&str> {
        self.factories.iter().map(|(s, _)| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl HostSource for Fixed {
        fn slug(&self) -> &str {
            self.0
        }

        async fn fetch_page(&self, _limit: u64, _offset: u64) -> Result<Vec<Value>> {
            Ok(vec![serde_json::json!({"hostname": self.0})])
        }
    }

    #[test]
    fn builtin_registry_knows_shipped_sources() {
        let registry = SourceRegistry::builtin();
        assert_eq!(registry.slugs(), vec!["qualys", "crowdstrike"]);
        assert!(registry.find("tenable").is_none());
    }

    #[tokio::test]
    async fn registered_factory_builds_source() {
        let mut registry = SourceRegistry::new();
        assert!(registry.is_empty());
        registry.register("fake", factory(|_| Ok(Fixed("fake"))));

        let source = registry.build(ClientConfig::new("fake")).unwrap();
        assert_eq!(source.slug(), "fake");
        assert_eq!(source.fetch_page(1, 0).await.unwrap().len(), 1);
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut registry = SourceRegistry::builtin();
        registry.register("qualys", factory(|_| Ok(Fixed("stub"))));
        assert_eq!(registry.len(), 2);
        let source = registry.build(ClientConfig::new("qualys")).unwrap();
        assert_eq!(source.slug(), "stub");
    }

    #[test]
    fn unknown_slug_is_a_config_error() {
        let err = SourceRegistry::new()
            .build(ClientConfig::new("tenable"))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
