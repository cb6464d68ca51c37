//! In-memory [`RawStore`] and [`HostStore`] for tests and dry runs.
//!
//! Collections are `Vec`s keyed by name behind `std::sync::RwLock`.
//! Streams work on a copy taken when they are created.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use uuid::Uuid;

use crate::models::{CanonicalHost, DuplicateGroup, HostField, RawRecord};

use super::{group_hosts, BatchStream, HostStore, RawStore};

type Collections<T> = RwLock<HashMap<String, Vec<T>>>;

/// In-memory store, see the module docs.
pub struct InMemoryStore {
    raw: Collections<RawRecord>,
    hosts: Collections<CanonicalHost>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            raw: RwLock::new(HashMap::new()),
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Copy of a raw collection, in insertion order.
    pub fn raw_records(&self, collection: &str) -> Result<Vec<RawRecord>> {
        Ok(read(&self.raw)?.get(collection).cloned().unwrap_or_default())
    }

    /// Copy of a host collection, in insertion order.
    pub fn hosts(&self, collection: &str) -> Result<Vec<CanonicalHost>> {
        Ok(read(&self.hosts)?.get(collection).cloned().unwrap_or_default())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn batches<'a, T: Send + 'a>(items: Result<Vec<T>>, batch_size: usize) -> BatchStream<'a, T> {
    let items = match items {
        Ok(items) => items,
        Err(e) => return stream::once(async move { Err(e) }).boxed(),
    };
    let size = batch_size.max(1);
    let mut chunks = Vec::new();
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(Ok(iter.by_ref().take(size).collect()));
    }
    stream::iter(chunks).boxed()
}

#[async_trait]
impl RawStore for InMemoryStore {
    async fn append_raw(&self, collection: &str, batch: &[RawRecord]) -> Result<()> {
        write(&self.raw)?
            .entry(collection.to_string())
            .or_default()
            .extend_from_slice(batch);
        Ok(())
    }

    fn stream_raw<'a>(&'a self, collection: &'a str, batch_size: usize) -> BatchStream<'a, RawRecord> {
        batches(self.raw_records(collection), batch_size)
    }
}

#[async_trait]
impl HostStore for InMemoryStore {
    async fn append_hosts(&self, collection: &str, batch: &[CanonicalHost]) -> Result<Vec<String>> {
        let mut hosts = write(&self.hosts)?;
        let stored = hosts.entry(collection.to_string()).or_default();
        let mut ids = Vec::with_capacity(batch.len());
        for host in batch {
            let id = Uuid::new_v4().to_string();
            stored.push(CanonicalHost {
                id: Some(id.clone()),
                ..host.clone()
            });
            ids.push(id);
        }
        Ok(ids)
    }

    fn stream_hosts<'a>(
        &'a self,
        collection: &'a str,
        batch_size: usize,
    ) -> BatchStream<'a, CanonicalHost> {
        batches(self.hosts(collection), batch_size)
    }

    fn stream_groups<'a>(
        &'a self,
        collection: &'a str,
        key: &'a [HostField],
        batch_size: usize,
    ) -> BatchStream<'a, DuplicateGroup> {
        let groups = self.hosts(collection).map(|hosts| group_hosts(hosts, key));
        batches(groups, batch_size)
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<u64> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut hosts = write(&self.hosts)?;
        let Some(stored) = hosts.get_mut(collection) else {
            return Ok(0);
        };
        let before = stored.len();
        stored.retain(|h| !h.id.as_deref().is_some_and(|id| doomed.contains(id)));
        Ok((before - stored.len()) as u64)
    }

    async fn replace_group(
        &self,
        collection: &str,
        ids: &[String],
        merged: &CanonicalHost,
    ) -> Result<String> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let id = Uuid::new_v4().to_string();
        let mut hosts = write(&self.hosts)?;
        let stored = hosts.entry(collection.to_string()).or_default();
        stored.retain(|h| !h.id.as_deref().is_some_and(|id| doomed.contains(id)));
        stored.push(CanonicalHost {
            id: Some(id.clone()),
            ..merged.clone()
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    fn host(hostname: &str) -> CanonicalHost {
        let mut h = CanonicalHost::from_source("qualys");
        h.hostname = Some(hostname.into());
        h
    }

    #[tokio::test]
    async fn raw_records_stream_in_batches() {
        let store = InMemoryStore::new();
        let records: Vec<_> = (0..5)
            .map(|i| RawRecord::new("qualys", json!({ "n": i })))
            .collect();
        store.append_raw("raw", &records).await.unwrap();

        let batches: Vec<Vec<RawRecord>> = store.stream_raw("raw", 2).try_collect().await.unwrap();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batches[2][0].payload, json!({ "n": 4 }));
    }

    #[tokio::test]
    async fn unknown_collection_is_empty() {
        let store = InMemoryStore::new();
        let batches: Vec<Vec<CanonicalHost>> =
            store.stream_hosts("nope", 10).try_collect().await.unwrap();
        assert!(batches.is_empty());
        assert_eq!(store.delete_by_ids("nope", &["x".into()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn append_assigns_ids_and_delete_removes_them() {
        let store = InMemoryStore::new();
        let ids = store
            .append_hosts("hosts", &[host("a"), host("b"), host("c")])
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);

        let removed = store.delete_by_ids("hosts", &ids[..2]).await.unwrap();
        assert_eq!(removed, 2);
        let left = store.hosts("hosts").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id.as_deref(), Some(ids[2].as_str()));
    }

    #[tokio::test]
    async fn replace_group_leaves_other_hosts_in_place() {
        let store = InMemoryStore::new();
        let ids = store
            .append_hosts("hosts", &[host("a"), host("b"), host("a")])
            .await
            .unwrap();

        let group = [ids[0].clone(), ids[2].clone()];
        let new_id = store.replace_group("hosts", &group, &host("a")).await.unwrap();

        let left: Vec<_> = store
            .hosts("hosts")
            .unwrap()
            .into_iter()
            .filter_map(|h| h.id)
            .collect();
        assert_eq!(left, vec![ids[1].clone(), new_id]);
    }

    #[tokio::test]
    async fn group_stream_ignores_writes_made_while_consuming() {
        let store = InMemoryStore::new();
        store
            .append_hosts("hosts", &[host("a"), host("a"), host("b")])
            .await
            .unwrap();

        let key = [HostField::Hostname];
        let mut stream = store.stream_groups("hosts", &key, 1);
        let mut seen = 0;
        while let Some(batch) = stream.try_next().await.unwrap() {
            for group in batch {
                seen += 1;
                store
                    .replace_group("hosts", &group.member_ids(), &host("a"))
                    .await
                    .unwrap();
            }
        }
        assert_eq!(seen, 2);
        assert_eq!(store.hosts("hosts").unwrap().len(), 2);
    }
}
