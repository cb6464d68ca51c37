//! Pipeline orchestration.
//!
//! A run walks three stages in order: fetch → normalize → dedup. Each stage
//! drains completely before the next one starts.
//!
//! - **fetch**: one task per `[fetching.sources.<slug>]`, each paging its
//!   upstream through a [`HostFetcher`] and appending raw batches to its
//!   own collection.
//! - **normalize**: one task per `[normalization.sources.<slug>]`, mapping
//!   raw batches through the source's normalizer. Sources whose fetch failed
//!   in the same run are skipped.
//! - **dedup**: groups the canonical collection by
//!   `deduplication.unique_keys`, merges every group with more than one
//!   member, deletes the members and appends the merged record.
//!
//! A failing source never cancels its siblings. Whatever succeeding sources
//! committed stays committed, and the [`RunReport`] records every source's
//! outcome.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use futures::TryStreamExt;
use serde::Serialize;
use tokio::task::JoinSet;

use host_inventory_core::merge::{Merger, PriorityMerger};
use host_inventory_core::models::CanonicalHost;
use host_inventory_core::normalize::normalizer_for;
use host_inventory_core::store::{HostStore, RawStore};

use crate::config::{Config, FetchSourceConfig, NormalizeSourceConfig};
use crate::connector::HostFetcher;
use crate::db;
use crate::error::PipelineError;
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::retry::RetryPolicy;
use crate::sqlite_store::SqliteStore;
use crate::traits::{ClientConfig, SourceRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Normalize,
    Dedup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::Dedup => "dedup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// What happened to one source in one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Succeeded { records: u64 },
    Failed { error: String },
    Skipped { reason: String },
}

impl SourceOutcome {
    fn from_result(result: std::result::Result<u64, PipelineError>) -> Self {
        match result {
            Ok(records) => SourceOutcome::Succeeded { records },
            Err(e) => SourceOutcome::Failed {
                error: e.to_string(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SourceOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    #[serde(flatten)]
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Ordered by source name.
    pub sources: Vec<SourceReport>,
}

impl StageReport {
    fn new(stage: Stage, outcomes: BTreeMap<String, SourceOutcome>) -> Self {
        Self {
            stage,
            sources: outcomes
                .into_iter()
                .map(|(source, outcome)| SourceReport { source, outcome })
                .collect(),
        }
    }

    pub fn outcome(&self, source: &str) -> Option<&SourceOutcome> {
        self.sources
            .iter()
            .find(|r| r.source == source)
            .map(|r| &r.outcome)
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &str> {
        self.sources
            .iter()
            .filter(|r| r.outcome.is_failed())
            .map(|r| r.source.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.failed_sources().next().is_none()
    }
}

/// Outcome of a whole run, stages in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.stages.iter().all(StageReport::is_success)
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// `(stage, source, error)` for every failed source.
    pub fn failures(&self) -> Vec<(Stage, &str, &str)> {
        self.stages
            .iter()
            .flat_map(|stage| {
                stage.sources.iter().filter_map(move |r| match &r.outcome {
                    SourceOutcome::Failed { error } => {
                        Some((stage.stage, r.source.as_str(), error.as_str()))
                    }
                    _ => None,
                })
            })
            .collect()
    }
}

/// Wires configuration, connectors, stores and merger together.
pub struct Pipeline {
    config: Arc<Config>,
    registry: SourceRegistry,
    raw: Arc<dyn RawStore>,
    hosts: Arc<dyn HostStore>,
    merger: Arc<dyn Merger>,
    progress: Arc<dyn ProgressReporter>,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, raw: Arc<dyn RawStore>, hosts: Arc<dyn HostStore>) -> Self {
        let dedup = &config.deduplication;
        let merger = PriorityMerger::new(dedup.source_priorities.clone())
            .with_provenance(dedup.provenance);
        Self {
            registry: SourceRegistry::builtin(),
            merger: Arc::new(merger),
            progress: Arc::new(NoProgress),
            config,
            raw,
            hosts,
        }
    }

    /// Pipeline over the SQLite database named in the config.
    pub async fn open(config: Arc<Config>) -> Result<Self> {
        let pool = db::connect(&config).await?;
        let store = Arc::new(SqliteStore::new(pool));
        Ok(Self::new(config, store.clone(), store))
    }

    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The canonical store the pipeline writes to.
    pub fn host_store(&self) -> Arc<dyn HostStore> {
        self.hosts.clone()
    }

    /// Run every stage.
    pub async fn run(&self) -> RunReport {
        tracing::info!("pipeline run started");
        let fetch = self.fetch_stage().await;
        let failed: HashSet<String> = fetch.failed_sources().map(str::to_string).collect();
        let normalize = self.normalize_stage(&failed).await;
        let dedup = self.dedup_stage().await;

        let report = RunReport {
            stages: vec![fetch, normalize, dedup],
        };
        if report.is_success() {
            tracing::info!("pipeline run finished");
        } else {
            tracing::error!(failures = report.failures().len(), "pipeline run finished with failures");
        }
        report
    }

    /// Run one stage on its own.
    pub async fn run_stage(&self, stage: Stage) -> RunReport {
        let report = match stage {
            Stage::Fetch => self.fetch_stage().await,
            Stage::Normalize => self.normalize_stage(&HashSet::new()).await,
            Stage::Dedup => self.dedup_stage().await,
        };
        RunReport {
            stages: vec![report],
        }
    }

    pub async fn fetch_stage(&self) -> StageReport {
        let sources = &self.config.fetching.sources;
        self.progress.report(ProgressEvent::StageStarted {
            stage: Stage::Fetch,
            sources: sources.len(),
        });

        let policy = RetryPolicy::from_config(&self.config.fetching);
        let mut workers = JoinSet::new();
        for (slug, source_config) in sources {
            let slug = slug.clone();
            let source_config = source_config.clone();
            let registry = self.registry.clone();
            let raw = self.raw.clone();
            let progress = self.progress.clone();
            workers.spawn(async move {
                let result =
                    fetch_source(&slug, &source_config, &registry, policy, &*raw, &*progress).await;
                (slug, result)
            });
        }

        let outcomes = self
            .join_workers(Stage::Fetch, sources.keys(), workers)
            .await;
        StageReport::new(Stage::Fetch, outcomes)
    }

    /// Normalize every configured source except those in `skip`.
    pub async fn normalize_stage(&self, skip: &HashSet<String>) -> StageReport {
        let sources = &self.config.normalization.sources;
        self.progress.report(ProgressEvent::StageStarted {
            stage: Stage::Normalize,
            sources: sources.len(),
        });

        let mut skipped = BTreeMap::new();
        let mut workers = JoinSet::new();
        for (slug, source_config) in sources {
            if skip.contains(slug) {
                tracing::warn!(slug = %slug, "skipping normalization, fetch failed");
                skipped.insert(
                    slug.clone(),
                    SourceOutcome::Skipped {
                        reason: "fetch failed in this run".to_string(),
                    },
                );
                continue;
            }
            let slug = slug.clone();
            let source_config = source_config.clone();
            let raw = self.raw.clone();
            let hosts = self.hosts.clone();
            let progress = self.progress.clone();
            workers.spawn(async move {
                let result =
                    normalize_source(&slug, &source_config, &*raw, &*hosts, &*progress).await;
                (slug, result)
            });
        }

        let running = sources.keys().filter(|slug| !skip.contains(*slug));
        let mut outcomes = self.join_workers(Stage::Normalize, running, workers).await;
        outcomes.extend(skipped);
        StageReport::new(Stage::Normalize, outcomes)
    }

    /// Merge duplicates in the canonical collection.
    pub async fn dedup_stage(&self) -> StageReport {
        let collection = self.config.deduplication.collection.clone();
        self.progress.report(ProgressEvent::StageStarted {
            stage: Stage::Dedup,
            sources: 1,
        });

        let result = self.deduplicate().await;
        self.finish(Stage::Dedup, &collection, &result);
        let outcomes = BTreeMap::from([(collection, SourceOutcome::from_result(result))]);
        StageReport::new(Stage::Dedup, outcomes)
    }

    async fn deduplicate(&self) -> std::result::Result<u64, PipelineError> {
        let dedup = &self.config.deduplication;
        let collection = dedup.collection.as_str();
        tracing::info!(collection, keys = ?dedup.unique_keys, "deduplicating");

        let mut groups = self
            .hosts
            .stream_groups(collection, &dedup.unique_keys, dedup.batch_size);
        let mut merged = 0u64;
        while let Some(batch) = groups.try_next().await.map_err(PipelineError::persistence)? {
            for group in batch.iter().filter(|g| g.is_duplicate()) {
                let record: CanonicalHost = self.merger.merge(group);
                let id = self
                    .hosts
                    .replace_group(collection, &group.member_ids(), &record)
                    .await
                    .map_err(PipelineError::persistence)?;
                tracing::debug!(
                    key = %group.key(),
                    members = group.members().len(),
                    %id,
                    "replaced group with merged record"
                );
                merged += 1;
            }
            self.progress.report(ProgressEvent::Records {
                stage: Stage::Dedup,
                source: collection.to_string(),
                n: merged,
            });
        }
        tracing::info!(collection, merged, "deduplication done");
        Ok(merged)
    }

    /// Wait for every worker. A worker that panicked is reported as failed.
    async fn join_workers<'a>(
        &self,
        stage: Stage,
        expected: impl Iterator<Item = &'a String>,
        mut workers: JoinSet<(String, std::result::Result<u64, PipelineError>)>,
    ) -> BTreeMap<String, SourceOutcome> {
        let mut outcomes: BTreeMap<String, SourceOutcome> = expected
            .map(|slug| {
                (
                    slug.clone(),
                    SourceOutcome::Failed {
                        error: "worker did not complete".to_string(),
                    },
                )
            })
            .collect();

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((slug, result)) => {
                    self.finish(stage, &slug, &result);
                    outcomes.insert(slug, SourceOutcome::from_result(result));
                }
                Err(e) => tracing::error!(%stage, error = %e, "worker task aborted"),
            }
        }
        outcomes
    }

    fn finish(&self, stage: Stage, source: &str, result: &std::result::Result<u64, PipelineError>) {
        let error = match result {
            Ok(records) => {
                tracing::info!(%stage, source, records, "source finished");
                None
            }
            Err(e) => {
                tracing::error!(%stage, source, error = %e, "source failed");
                Some(e.to_string())
            }
        };
        self.progress.report(ProgressEvent::SourceFinished {
            stage,
            source: source.to_string(),
            error,
        });
    }
}

fn api_token(config: &FetchSourceConfig) -> std::result::Result<Option<String>, PipelineError> {
    match &config.api_token_env {
        Some(var) => std::env::var(var)
            .map(Some)
            .map_err(|_| PipelineError::Config(format!("environment variable {var} is not set"))),
        None => Ok(None),
    }
}

async fn fetch_source(
    slug: &str,
    config: &FetchSourceConfig,
    registry: &SourceRegistry,
    policy: RetryPolicy,
    raw: &dyn RawStore,
    progress: &dyn ProgressReporter,
) -> std::result::Result<u64, PipelineError> {
    let source = registry.build(ClientConfig {
        slug: slug.to_string(),
        api_token: api_token(config)?,
        endpoint_url: config.endpoint_url.clone(),
    })?;
    tracing::info!(
        slug,
        offset = config.offset,
        limit = config.limit,
        collection = %config.target_collection,
        "fetching"
    );

    let fetcher = HostFetcher::new(source, policy, config.limit, config.offset, config.batch_size);
    let mut batches = fetcher.into_stream();
    let mut total = 0u64;
    while let Some(batch) = batches.try_next().await? {
        if batch.is_empty() {
            continue;
        }
        raw.append_raw(&config.target_collection, &batch)
            .await
            .map_err(PipelineError::persistence)?;
        total += batch.len() as u64;
        tracing::info!(slug, records = batch.len(), total, "stored raw batch");
        progress.report(ProgressEvent::Records {
            stage: Stage::Fetch,
            source: slug.to_string(),
            n: total,
        });
    }
    Ok(total)
}

async fn normalize_source(
    slug: &str,
    config: &NormalizeSourceConfig,
    raw: &dyn RawStore,
    hosts: &dyn HostStore,
    progress: &dyn ProgressReporter,
) -> std::result::Result<u64, PipelineError> {
    let normalizer = normalizer_for(slug)
        .ok_or_else(|| PipelineError::Config(format!("no normalizer for source '{slug}'")))?;
    tracing::info!(
        slug,
        from = %config.source_collection,
        to = %config.target_collection,
        "normalizing"
    );

    let mut batches = raw.stream_raw(&config.source_collection, config.batch_size);
    let mut total = 0u64;
    while let Some(batch) = batches.try_next().await.map_err(PipelineError::persistence)? {
        let normalized: Vec<CanonicalHost> = batch.iter().map(|r| normalizer.normalize(r)).collect();
        hosts
            .append_hosts(&config.target_collection, &normalized)
            .await
            .map_err(PipelineError::persistence)?;
        total += normalized.len() as u64;
        tracing::info!(slug, records = normalized.len(), total, "stored normalized batch");
        progress.report(ProgressEvent::Records {
            stage: Stage::Normalize,
            source: slug.to_string(),
            n: total,
        });
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::traits::{factory, HostSource};
    use async_trait::async_trait;
    use host_inventory_core::models::{DuplicateGroup, HostField};
    use host_inventory_core::store::memory::InMemoryStore;
    use host_inventory_core::store::BatchStream;
    use serde_json::{json, Value};

    /// Serves a fixed host list with offset/limit paging.
    struct Listing {
        slug: &'static str,
        hosts: Vec<Value>,
    }

    #[async_trait]
    impl HostSource for Listing {
        fn slug(&self) -> &str {
            self.slug
        }

        async fn fetch_page(
            &self,
            limit: u64,
            offset: u64,
        ) -> std::result::Result<Vec<Value>, PipelineError> {
            Ok(self
                .hosts
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }

    /// Always answers with a malformed body.
    struct Broken;

    #[async_trait]
    impl HostSource for Broken {
        fn slug(&self) -> &str {
            "crowdstrike"
        }

        async fn fetch_page(
            &self,
            _limit: u64,
            _offset: u64,
        ) -> std::result::Result<Vec<Value>, PipelineError> {
            Err(PipelineError::UpstreamContract {
                slug: "crowdstrike".into(),
                reason: "response is not JSON".into(),
            })
        }
    }

    const CONFIG: &str = r#"
[db]
path = "unused.sqlite"

[fetching]
retry_limit = 1

[fetching.sources.qualys]
limit = 2
batch_size = 2
target_collection = "raw_qualys"

[fetching.sources.crowdstrike]
limit = 2
target_collection = "raw_crowdstrike"

[normalization.sources.qualys]
source_collection = "raw_qualys"
target_collection = "normalized_data"

[normalization.sources.crowdstrike]
source_collection = "raw_crowdstrike"
target_collection = "normalized_data"

[deduplication]
collection = "normalized_data"
unique_keys = ["hostname"]

[deduplication.source_priorities]
qualys = 1
crowdstrike = 2
"#;

    fn qualys_host(name: &str, platform: &str) -> Value {
        json!({
            "sourceInfo": {"list": [{"Ec2AssetSourceSimple": {"localHostname": name}}]},
            "agentInfo": {"platform": platform},
        })
    }

    fn crowdstrike_host(name: &str, platform: &str, first_seen: &str) -> Value {
        json!({"hostname": name, "platform_name": platform, "first_seen": first_seen})
    }

    fn registry(crowdstrike_broken: bool) -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        registry.register(
            "qualys",
            factory(|_| {
                Ok(Listing {
                    slug: "qualys",
                    hosts: vec![
                        qualys_host("web-1", "Linux"),
                        qualys_host("db-1", "Linux"),
                        qualys_host("mail-1", "Windows"),
                    ],
                })
            }),
        );
        if crowdstrike_broken {
            registry.register("crowdstrike", factory(|_| Ok(Broken)));
        } else {
            registry.register(
                "crowdstrike",
                factory(|_| {
                    Ok(Listing {
                        slug: "crowdstrike",
                        hosts: vec![crowdstrike_host("web-1", "Ubuntu", "2024-01-01T00:00:00Z")],
                    })
                }),
            );
        }
        registry
    }

    fn pipeline(store: &Arc<InMemoryStore>, crowdstrike_broken: bool) -> Pipeline {
        let config = Arc::new(parse_config(CONFIG).unwrap());
        Pipeline::new(config, store.clone(), store.clone()).with_registry(registry(crowdstrike_broken))
    }

    #[tokio::test]
    async fn full_run_fetches_normalizes_and_merges() {
        let store = Arc::new(InMemoryStore::new());
        let report = pipeline(&store, false).run().await;
        assert!(report.is_success(), "{report:?}");

        let fetch = report.stage(Stage::Fetch).unwrap();
        assert_eq!(fetch.outcome("qualys"), Some(&SourceOutcome::Succeeded { records: 3 }));
        assert_eq!(fetch.outcome("crowdstrike"), Some(&SourceOutcome::Succeeded { records: 1 }));
        assert_eq!(store.raw_records("raw_qualys").unwrap().len(), 3);

        let dedup = report.stage(Stage::Dedup).unwrap();
        assert_eq!(dedup.outcome("normalized_data"), Some(&SourceOutcome::Succeeded { records: 1 }));

        let hosts = store.hosts("normalized_data").unwrap();
        assert_eq!(hosts.len(), 3);
        let web = hosts
            .iter()
            .find(|h| h.hostname.as_deref() == Some("web-1"))
            .unwrap();
        assert_eq!(web.platform.as_deref(), Some("Ubuntu"));
        assert_eq!(web.sources.len(), 2);
        assert!(web.first_seen_at.is_some());
    }

    #[tokio::test]
    async fn failing_source_does_not_abort_siblings() {
        let store = Arc::new(InMemoryStore::new());
        let report = pipeline(&store, true).run().await;
        assert!(!report.is_success());

        let fetch = report.stage(Stage::Fetch).unwrap();
        assert_eq!(fetch.outcome("qualys"), Some(&SourceOutcome::Succeeded { records: 3 }));
        assert!(fetch.outcome("crowdstrike").unwrap().is_failed());

        let normalize = report.stage(Stage::Normalize).unwrap();
        assert!(matches!(
            normalize.outcome("crowdstrike"),
            Some(SourceOutcome::Skipped { .. })
        ));
        assert_eq!(store.hosts("normalized_data").unwrap().len(), 3);

        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, Stage::Fetch);
        assert_eq!(failures[0].1, "crowdstrike");
        assert!(failures[0].2.contains("not JSON"));
    }

    #[tokio::test]
    async fn missing_token_variable_fails_only_that_source() {
        let store = Arc::new(InMemoryStore::new());
        let with_token = CONFIG.replace(
            "[fetching.sources.crowdstrike]\n",
            "[fetching.sources.crowdstrike]\napi_token_env = \"HINV_TEST_TOKEN_THAT_IS_NOT_SET\"\n",
        );
        let config = Arc::new(parse_config(&with_token).unwrap());
        let pipeline =
            Pipeline::new(config, store.clone(), store.clone()).with_registry(registry(false));

        let report = pipeline.run_stage(Stage::Fetch).await;
        let fetch = report.stage(Stage::Fetch).unwrap();
        match fetch.outcome("crowdstrike") {
            Some(SourceOutcome::Failed { error }) => {
                assert!(error.contains("HINV_TEST_TOKEN_THAT_IS_NOT_SET"), "{error}")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fetch.outcome("qualys"), Some(&SourceOutcome::Succeeded { records: 3 }));
    }

    #[tokio::test]
    async fn dedup_stage_alone_leaves_singletons_untouched() {
        let store = Arc::new(InMemoryStore::new());
        let mut lonely = CanonicalHost::from_source("qualys");
        lonely.hostname = Some("solo".into());
        let ids = store.append_hosts("normalized_data", &[lonely]).await.unwrap();

        let report = pipeline(&store, false).run_stage(Stage::Dedup).await;
        assert!(report.is_success());
        let hosts = store.hosts("normalized_data").unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].id.as_deref(), Some(ids[0].as_str()));
    }

    /// Reads and deletes go through; every write of a host fails.
    struct RejectsWrites(InMemoryStore);

    #[async_trait]
    impl HostStore for RejectsWrites {
        async fn append_hosts(
            &self,
            _collection: &str,
            _batch: &[CanonicalHost],
        ) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("disk full")
        }

        fn stream_hosts<'a>(
            &'a self,
            collection: &'a str,
            batch_size: usize,
        ) -> BatchStream<'a, CanonicalHost> {
            self.0.stream_hosts(collection, batch_size)
        }

        fn stream_groups<'a>(
            &'a self,
            collection: &'a str,
            key: &'a [HostField],
            batch_size: usize,
        ) -> BatchStream<'a, DuplicateGroup> {
            self.0.stream_groups(collection, key, batch_size)
        }

        async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> anyhow::Result<u64> {
            self.0.delete_by_ids(collection, ids).await
        }

        async fn replace_group(
            &self,
            _collection: &str,
            _ids: &[String],
            _merged: &CanonicalHost,
        ) -> anyhow::Result<String> {
            anyhow::bail!("disk full")
        }
    }

    #[tokio::test]
    async fn failed_merge_write_keeps_the_group_members() {
        let inner = InMemoryStore::new();
        let mut web = CanonicalHost::from_source("qualys");
        web.hostname = Some("web".into());
        let ids = inner
            .append_hosts("normalized_data", &[web.clone(), web])
            .await
            .unwrap();
        let store = Arc::new(RejectsWrites(inner));

        let config = Arc::new(parse_config(CONFIG).unwrap());
        let report = Pipeline::new(config, Arc::new(InMemoryStore::new()), store.clone())
            .with_registry(registry(false))
            .run_stage(Stage::Dedup)
            .await;

        assert!(!report.is_success());
        let dedup = report.stage(Stage::Dedup).unwrap();
        assert!(dedup.outcome("normalized_data").unwrap().is_failed());
        let left: Vec<String> = store
            .0
            .hosts("normalized_data")
            .unwrap()
            .into_iter()
            .filter_map(|h| h.id)
            .collect();
        assert_eq!(left, ids);
    }

    #[test]
    fn report_serializes_with_status_tags() {
        let report = RunReport {
            stages: vec![StageReport::new(
                Stage::Fetch,
                BTreeMap::from([(
                    "qualys".to_string(),
                    SourceOutcome::Succeeded { records: 4 },
                )]),
            )],
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"stages": [{"stage": "fetch", "sources": [
                {"source": "qualys", "status": "succeeded", "records": 4}
            ]}]})
        );
    }
}
