//! SQLite-backed [`RawStore`] and [`HostStore`].
//!
//! Collections are rows tagged with a `collection` column in the
//! `raw_records` and `hosts` tables created by [`crate::migrate`]. Streams
//! page through a collection with keyset pagination on the insertion
//! sequence, so each batch is one indexed query.
//!
//! [`HostStore::stream_groups`] first snapshots `(id, key columns)` for the
//! whole collection, ordered by key then insertion, and then loads member
//! rows batch by batch. Rows inserted after the snapshot are never visited,
//! and rows deleted after it are skipped.

use std::collections::{HashMap, VecDeque};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use host_inventory_core::models::{CanonicalHost, DuplicateGroup, GroupKey, HostField, RawRecord};
use host_inventory_core::store::{BatchStream, HostStore, RawStore};

/// Upper bound on bound parameters per `IN (...)` list.
const ID_CHUNK: usize = 500;

const HOST_COLUMNS: &str = "seq, id, hostname, local_ip, external_ip, mac_address, provider, \
     os_version, platform, first_seen_at, last_seen_at, open_ports_count, vuln_count, \
     open_ports, software, sources";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn count_raw(&self, collection: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM raw_records WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_hosts(&self, collection: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM hosts WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn raw_page(
        &self,
        collection: &str,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<Option<(Vec<RawRecord>, Option<i64>)>> {
        let Some(after) = cursor else {
            return Ok(None);
        };
        let rows = sqlx::query(
            "SELECT id, source, payload FROM raw_records \
             WHERE collection = ? AND id > ? ORDER BY id LIMIT ?",
        )
        .bind(collection)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("reading raw collection '{collection}'"))?;

        let Some(last) = rows.last() else {
            return Ok(None);
        };
        let next = if rows.len() == limit {
            Some(last.try_get::<i64, _>("id")?)
        } else {
            None
        };
        let batch = rows
            .iter()
            .map(|row| -> Result<RawRecord> {
                let payload: String = row.try_get("payload")?;
                Ok(RawRecord::new(
                    row.try_get::<String, _>("source")?,
                    serde_json::from_str(&payload)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some((batch, next)))
    }

    async fn host_page(
        &self,
        collection: &str,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<Option<(Vec<CanonicalHost>, Option<i64>)>> {
        let Some(after) = cursor else {
            return Ok(None);
        };
        let rows = sqlx::query(&format!(
            "SELECT {HOST_COLUMNS} FROM hosts WHERE collection = ? AND seq > ? ORDER BY seq LIMIT ?"
        ))
        .bind(collection)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("reading host collection '{collection}'"))?;

        let Some(last) = rows.last() else {
            return Ok(None);
        };
        let next = if rows.len() == limit {
            Some(last.try_get::<i64, _>("seq")?)
        } else {
            None
        };
        let batch = rows.iter().map(host_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Some((batch, next)))
    }

    /// `(id, key)` for every host in the collection, ordered by key then
    /// insertion.
    async fn group_snapshot(
        &self,
        collection: &str,
        key: &[HostField],
    ) -> Result<VecDeque<(GroupKey, Vec<String>)>> {
        let columns: Vec<&str> = key.iter().map(|f| f.as_str()).collect();
        let sql = format!(
            "SELECT id, {cols} FROM hosts WHERE collection = ? ORDER BY {cols}, seq",
            cols = columns.join(", ")
        );
        let rows = sqlx::query(&sql)
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("grouping '{collection}' by {}", columns.join(", ")))?;

        let mut groups: VecDeque<(GroupKey, Vec<String>)> = VecDeque::new();
        for row in &rows {
            let id: String = row.try_get("id")?;
            let entries = key
                .iter()
                .map(|f| -> Result<(HostField, Option<String>)> {
                    Ok((*f, row.try_get(f.as_str())?))
                })
                .collect::<Result<Vec<_>>>()?;
            let group_key = GroupKey::new(entries);
            if let Some((last, ids)) = groups.back_mut() {
                if *last == group_key {
                    ids.push(id);
                    continue;
                }
            }
            groups.push_back((group_key, vec![id]));
        }
        Ok(groups)
    }

    async fn hosts_by_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<CanonicalHost>> {
        let mut hosts = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("SELECT {HOST_COLUMNS} FROM hosts WHERE collection = "));
            query.push_bind(collection).push(" AND id IN (");
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(id);
            }
            separated.push_unseparated(") ORDER BY seq");
            let rows = query.build().fetch_all(&self.pool).await?;
            for row in &rows {
                hosts.push(host_from_row(row)?);
            }
        }
        Ok(hosts)
    }

    async fn group_page(
        &self,
        collection: &str,
        key: &[HostField],
        state: Option<VecDeque<(GroupKey, Vec<String>)>>,
        batch_size: usize,
    ) -> Result<Option<(Vec<DuplicateGroup>, Option<VecDeque<(GroupKey, Vec<String>)>>)>> {
        let mut pending = match state {
            Some(pending) => pending,
            None => self.group_snapshot(collection, key).await?,
        };
        if pending.is_empty() {
            return Ok(None);
        }

        let take = batch_size.min(pending.len());
        let wanted: Vec<(GroupKey, Vec<String>)> = pending.drain(..take).collect();
        let all_ids: Vec<String> = wanted.iter().flat_map(|(_, ids)| ids.iter().cloned()).collect();
        let mut by_id: HashMap<String, CanonicalHost> = self
            .hosts_by_ids(collection, &all_ids)
            .await?
            .into_iter()
            .filter_map(|h| h.id.clone().map(|id| (id, h)))
            .collect();

        let groups = wanted
            .into_iter()
            .filter_map(|(group_key, ids)| {
                let members = ids.iter().filter_map(|id| by_id.remove(id)).collect();
                DuplicateGroup::new(group_key, members)
            })
            .collect();
        Ok(Some((groups, Some(pending))))
    }
}

fn ts_to_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

fn millis_to_ts(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

fn host_from_row(row: &SqliteRow) -> Result<CanonicalHost> {
    let open_ports: String = row.try_get("open_ports")?;
    let software: String = row.try_get("software")?;
    let sources: String = row.try_get("sources")?;
    Ok(CanonicalHost {
        id: Some(row.try_get("id")?),
        hostname: row.try_get("hostname")?,
        local_ip: row.try_get("local_ip")?,
        external_ip: row.try_get("external_ip")?,
        mac_address: row.try_get("mac_address")?,
        provider: row.try_get("provider")?,
        os_version: row.try_get("os_version")?,
        platform: row.try_get("platform")?,
        first_seen_at: millis_to_ts(row.try_get("first_seen_at")?),
        last_seen_at: millis_to_ts(row.try_get("last_seen_at")?),
        open_ports_count: row
            .try_get::<Option<i64>, _>("open_ports_count")?
            .map(|n| n.max(0) as u64),
        vuln_count: row
            .try_get::<Option<i64>, _>("vuln_count")?
            .map(|n| n.max(0) as u64),
        open_ports: serde_json::from_str(&open_ports).context("decoding open_ports")?,
        software: serde_json::from_str(&software).context("decoding software")?,
        sources: serde_json::from_str(&sources).context("decoding sources")?,
    })
}

#[async_trait]
impl RawStore for SqliteStore {
    async fn append_raw(&self, collection: &str, batch: &[RawRecord]) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for record in batch {
            sqlx::query(
                "INSERT INTO raw_records (collection, source, payload, fetched_at) VALUES (?, ?, ?, ?)",
            )
            .bind(collection)
            .bind(&record.source)
            .bind(serde_json::to_string(&record.payload)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit()
            .await
            .with_context(|| format!("appending to raw collection '{collection}'"))?;
        Ok(())
    }

    fn stream_raw<'a>(&'a self, collection: &'a str, batch_size: usize) -> BatchStream<'a, RawRecord> {
        let limit = batch_size.max(1);
        stream::try_unfold(Some(0), move |cursor| self.raw_page(collection, cursor, limit)).boxed()
    }
}

#[async_trait]
impl HostStore for SqliteStore {
    async fn append_hosts(&self, collection: &str, batch: &[CanonicalHost]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(batch.len());
        let mut tx = self.pool.begin().await?;
        for host in batch {
            ids.push(insert_host(&mut tx, collection, host).await?);
        }
        tx.commit()
            .await
            .with_context(|| format!("appending to host collection '{collection}'"))?;
        Ok(ids)
    }

    fn stream_hosts<'a>(
        &'a self,
        collection: &'a str,
        batch_size: usize,
    ) -> BatchStream<'a, CanonicalHost> {
        let limit = batch_size.max(1);
        stream::try_unfold(Some(0), move |cursor| self.host_page(collection, cursor, limit)).boxed()
    }

    fn stream_groups<'a>(
        &'a self,
        collection: &'a str,
        key: &'a [HostField],
        batch_size: usize,
    ) -> BatchStream<'a, DuplicateGroup> {
        let batch_size = batch_size.max(1);
        stream::try_unfold(None, move |state| {
            self.group_page(collection, key, state, batch_size)
        })
        .boxed()
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = delete_ids(&mut tx, collection, ids).await?;
        tx.commit()
            .await
            .with_context(|| format!("deleting from host collection '{collection}'"))?;
        Ok(removed)
    }

    async fn replace_group(
        &self,
        collection: &str,
        ids: &[String],
        merged: &CanonicalHost,
    ) -> Result<String> {
        let mut tx = self.pool.begin().await?;
        delete_ids(&mut tx, collection, ids).await?;
        let id = insert_host(&mut tx, collection, merged).await?;
        tx.commit()
            .await
            .with_context(|| format!("replacing group in host collection '{collection}'"))?;
        Ok(id)
    }
}

async fn insert_host(
    conn: &mut SqliteConnection,
    collection: &str,
    host: &CanonicalHost,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO hosts (id, collection, hostname, local_ip, external_ip, mac_address,
                           provider, os_version, platform, first_seen_at, last_seen_at,
                           open_ports_count, vuln_count, open_ports, software, sources)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(collection)
    .bind(&host.hostname)
    .bind(&host.local_ip)
    .bind(&host.external_ip)
    .bind(&host.mac_address)
    .bind(&host.provider)
    .bind(&host.os_version)
    .bind(&host.platform)
    .bind(ts_to_millis(host.first_seen_at))
    .bind(ts_to_millis(host.last_seen_at))
    .bind(host.open_ports_count.map(|n| n as i64))
    .bind(host.vuln_count.map(|n| n as i64))
    .bind(serde_json::to_string(&host.open_ports)?)
    .bind(serde_json::to_string(&host.software)?)
    .bind(serde_json::to_string(&host.sources)?)
    .execute(&mut *conn)
    .await?;
    Ok(id)
}

async fn delete_ids(conn: &mut SqliteConnection, collection: &str, ids: &[String]) -> Result<u64> {
    let mut removed = 0;
    for chunk in ids.chunks(ID_CHUNK) {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM hosts WHERE collection = ");
        query.push_bind(collection).push(" AND id IN (");
        let mut separated = query.separated(", ");
        for id in chunk {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        removed += query.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(removed)
}
