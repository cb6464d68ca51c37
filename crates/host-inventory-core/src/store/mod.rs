//! Storage contracts for the pipeline.
//!
//! Two collaborators sit behind the pipeline stages:
//!
//! | Trait | Used by | Operations |
//! |-------|---------|------------|
//! | [`RawStore`] | fetch, normalize | [`append_raw`](RawStore::append_raw), [`stream_raw`](RawStore::stream_raw) |
//! | [`HostStore`] | normalize, dedup, stats | [`append_hosts`](HostStore::append_hosts), [`stream_hosts`](HostStore::stream_hosts), [`stream_groups`](HostStore::stream_groups), [`delete_by_ids`](HostStore::delete_by_ids), [`replace_group`](HostStore::replace_group) |
//!
//! A *collection* is a named logical partition. Each fetch or normalize
//! worker writes its own collection, so workers never contend on a write.
//!
//! Streams are finite and yield batches. [`HostStore::stream_groups`] works
//! from a snapshot taken when the stream starts: records appended or
//! deleted while it is consumed never show up in later batches.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::models::{CanonicalHost, DuplicateGroup, GroupKey, HostField, RawRecord};

/// A lazy, finite sequence of batches.
pub type BatchStream<'a, T> = BoxStream<'a, Result<Vec<T>>>;

/// Storage for raw provider payloads.
#[async_trait]
pub trait RawStore: Send + Sync {
    async fn append_raw(&self, collection: &str, batch: &[RawRecord]) -> Result<()>;

    /// Stream a collection in insertion order.
    fn stream_raw<'a>(&'a self, collection: &'a str, batch_size: usize) -> BatchStream<'a, RawRecord>;
}

/// Storage for canonical host records.
#[async_trait]
pub trait HostStore: Send + Sync {
    /// Persist a batch and return the ids assigned to it, in order.
    async fn append_hosts(&self, collection: &str, batch: &[CanonicalHost]) -> Result<Vec<String>>;

    /// Stream a collection in insertion order. Every yielded host has an id.
    fn stream_hosts<'a>(
        &'a self,
        collection: &'a str,
        batch_size: usize,
    ) -> BatchStream<'a, CanonicalHost>;

    /// Stream every group of hosts sharing the same values for `key`.
    ///
    /// Groups come out ordered by key, members in insertion order. Groups
    /// of one are included; callers decide what to do with them.
    fn stream_groups<'a>(
        &'a self,
        collection: &'a str,
        key: &'a [HostField],
        batch_size: usize,
    ) -> BatchStream<'a, DuplicateGroup>;

    /// Remove the given records. Returns how many were removed.
    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<u64>;

    /// Atomically remove `ids` and append `merged` in their place. Returns
    /// the id assigned to `merged`. On error the collection is unchanged.
    async fn replace_group(
        &self,
        collection: &str,
        ids: &[String],
        merged: &CanonicalHost,
    ) -> Result<String>;
}

/// Partition `hosts` into groups by `key`.
///
/// Ordering follows [`GroupKey`]: unset values sort first. Members keep
/// their relative order.
pub fn group_hosts(hosts: Vec<CanonicalHost>, key: &[HostField]) -> Vec<DuplicateGroup> {
    let mut keyed: Vec<(GroupKey, CanonicalHost)> = hosts
        .into_iter()
        .map(|h| (GroupKey::of(&h, key), h))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut runs: Vec<(GroupKey, Vec<CanonicalHost>)> = Vec::new();
    for (k, host) in keyed {
        if let Some((last, members)) = runs.last_mut() {
            if *last == k {
                members.push(host);
                continue;
            }
        }
        runs.push((k, vec![host]));
    }
    runs.into_iter()
        .filter_map(|(k, members)| DuplicateGroup::new(k, members))
        .collect()
}
