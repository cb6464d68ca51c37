use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// One configured fetch source as shown by `hinv sources`.
#[derive(Debug, PartialEq, Eq)]
pub struct SourceStatus {
    pub slug: String,
    /// `None` when no token variable is configured.
    pub token_set: Option<bool>,
    pub priority: i64,
    pub target_collection: String,
    pub normalized: bool,
}

/// Describe every `[fetching.sources]` entry without touching the network.
pub fn source_statuses(config: &Config) -> Vec<SourceStatus> {
    config
        .fetching
        .sources
        .iter()
        .map(|(slug, source)| SourceStatus {
            slug: slug.clone(),
            token_set: source
                .api_token_env
                .as_ref()
                .map(|var| std::env::var(var).is_ok()),
            priority: config
                .deduplication
                .source_priorities
                .get(slug)
                .copied()
                .unwrap_or(0),
            target_collection: source.target_collection.clone(),
            normalized: config.normalization.sources.contains_key(slug),
        })
        .collect()
}

pub async fn list_sources(config: &Config) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);

    println!(
        "{:<16} {:<10} {:>8} {:<24} {:>8}  NORMALIZED",
        "SOURCE", "TOKEN", "PRIORITY", "COLLECTION", "RAW"
    );
    for status in source_statuses(config) {
        let token = match status.token_set {
            Some(true) => "set",
            Some(false) => "MISSING",
            None => "none",
        };
        let raw = store.count_raw(&status.target_collection).await?;
        println!(
            "{:<16} {:<10} {:>8} {:<24} {:>8}  {}",
            status.slug, token, status.priority, status.target_collection, raw, status.normalized
        );
    }

    let collection = &config.deduplication.collection;
    let hosts = store.count_hosts(collection).await?;
    println!();
    println!("{} canonical hosts in {}", hosts, collection);
    Ok(())
}
