use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use host_inventory_core::merge::Provenance;
use host_inventory_core::models::HostField;
use host_inventory_core::normalize::normalizer_for;

use crate::traits::SourceRegistry;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub fetching: FetchingConfig,
    #[serde(default)]
    pub normalization: NormalizationConfig,
    pub deduplication: DeduplicationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchingConfig {
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default)]
    pub sources: BTreeMap<String, FetchSourceConfig>,
}

impl Default for FetchingConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            sources: BTreeMap::new(),
        }
    }
}

impl FetchingConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

fn default_retry_limit() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_cap_ms() -> u64 {
    10_000
}

/// `[fetching.sources.<slug>]`
#[derive(Debug, Deserialize, Clone)]
pub struct FetchSourceConfig {
    /// Environment variable holding the API token. No token header is sent
    /// when unset.
    #[serde(default)]
    pub api_token_env: Option<String>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    pub target_collection: String,
    /// Overrides the connector's built-in endpoint.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_limit() -> u64 {
    1
}
fn default_batch_size() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NormalizationConfig {
    #[serde(default)]
    pub sources: BTreeMap<String, NormalizeSourceConfig>,
}

/// `[normalization.sources.<slug>]`
#[derive(Debug, Deserialize, Clone)]
pub struct NormalizeSourceConfig {
    pub source_collection: String,
    pub target_collection: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeduplicationConfig {
    pub collection: String,
    pub unique_keys: Vec<HostField>,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub source_priorities: HashMap<String, i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_stats_collection")]
    pub collection: String,
    #[serde(default = "default_days_threshold")]
    pub days_threshold: i64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            collection: default_stats_collection(),
            days_threshold: default_days_threshold(),
        }
    }
}

fn default_stats_collection() -> String {
    "normalized_data".to_string()
}
fn default_days_threshold() -> i64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config, &SourceRegistry::builtin())?;
    Ok(config)
}

/// Checks everything serde cannot: known slugs, positive sizes, a usable
/// grouping key.
pub fn validate(config: &Config, registry: &SourceRegistry) -> Result<()> {
    if config.fetching.retry_limit == 0 {
        bail!("fetching.retry_limit must be >= 1");
    }
    if config.fetching.backoff_cap_ms < config.fetching.backoff_base_ms {
        bail!("fetching.backoff_cap_ms must be >= fetching.backoff_base_ms");
    }

    for (slug, source) in &config.fetching.sources {
        if registry.find(slug).is_none() {
            bail!(
                "Unknown source '{}' in [fetching.sources]. Known sources: {}",
                slug,
                registry.slugs().join(", ")
            );
        }
        if source.limit == 0 {
            bail!("fetching.sources.{}.limit must be >= 1", slug);
        }
        if source.batch_size == 0 {
            bail!("fetching.sources.{}.batch_size must be >= 1", slug);
        }
        if source.target_collection.trim().is_empty() {
            bail!("fetching.sources.{}.target_collection must not be empty", slug);
        }
    }

    for (slug, source) in &config.normalization.sources {
        if normalizer_for(slug).is_none() {
            bail!("No normalizer for source '{}' in [normalization.sources]", slug);
        }
        if source.batch_size == 0 {
            bail!("normalization.sources.{}.batch_size must be >= 1", slug);
        }
    }

    let dedup = &config.deduplication;
    if dedup.unique_keys.is_empty() {
        bail!("deduplication.unique_keys must name at least one field");
    }
    if let Some(field) = dedup.unique_keys.iter().find(|f| !f.is_groupable()) {
        bail!(
            "deduplication.unique_keys: '{}' cannot be used for grouping",
            field
        );
    }
    if dedup.batch_size == 0 {
        bail!("deduplication.batch_size must be >= 1");
    }

    if config.stats.days_threshold < 0 {
        bail!("stats.days_threshold must be >= 0");
    }

    Ok(())
}
