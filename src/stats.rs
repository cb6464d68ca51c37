//! Inventory statistics over a canonical collection.
//!
//! Every figure is computed by streaming the collection once through
//! [`HostStore::stream_hosts`], so the same code backs `hinv stats` and the
//! `/stats/*` HTTP routes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use serde::Serialize;

use host_inventory_core::models::CanonicalHost;
use host_inventory_core::store::HostStore;

use crate::config::Config;
use crate::db;
use crate::progress::format_number;
use crate::sqlite_store::SqliteStore;

const BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformCount {
    pub platform: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgeSplit {
    pub old: u64,
    pub new: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortCount {
    pub port: u16,
    pub count: u64,
}

/// Platform → distribution of the requested ports.
pub type PortsByPlatform = BTreeMap<String, BTreeMap<u16, u64>>;

/// Aggregates computed in one pass.
#[derive(Debug, Default)]
pub struct InventoryStats {
    pub hosts: u64,
    platforms: HashMap<String, u64>,
    last_seen: Vec<DateTime<Utc>>,
    ports: BTreeMap<u16, u64>,
    platform_ports: HashMap<String, BTreeMap<u16, u64>>,
}

impl InventoryStats {
    pub fn observe(&mut self, host: &CanonicalHost) {
        self.hosts += 1;
        if let Some(seen) = host.last_seen_at {
            self.last_seen.push(seen);
        }

        // A host exposing a port over several protocols counts once.
        let ports: BTreeSet<u16> = host.open_ports.iter().map(|p| p.port).collect();
        for port in &ports {
            *self.ports.entry(*port).or_default() += 1;
        }

        if let Some(platform) = &host.platform {
            *self.platforms.entry(platform.clone()).or_default() += 1;
            let by_port = self.platform_ports.entry(platform.clone()).or_default();
            for port in &ports {
                *by_port.entry(*port).or_default() += 1;
            }
        }
    }

    /// Host count per platform, most common first. Ties break by name.
    pub fn os_distribution(&self) -> Vec<PlatformCount> {
        let mut out: Vec<PlatformCount> = self
            .platforms
            .iter()
            .map(|(platform, count)| PlatformCount {
                platform: platform.clone(),
                count: *count,
            })
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.platform.cmp(&b.platform)));
        out
    }

    /// Hosts last seen at or before `now - days` are old. Hosts that were
    /// never seen are not counted.
    pub fn old_vs_new(&self, days: i64, now: DateTime<Utc>) -> AgeSplit {
        let old = match Duration::try_days(days).and_then(|d| now.checked_sub_signed(d)) {
            Some(cutoff) => self.last_seen.iter().filter(|seen| **seen <= cutoff).count() as u64,
            None => 0,
        };
        AgeSplit {
            old,
            new: self.last_seen.len() as u64 - old,
        }
    }

    /// Number of hosts exposing each port, by ascending port.
    pub fn open_ports(&self) -> Vec<PortCount> {
        self.ports
            .iter()
            .map(|(port, count)| PortCount {
                port: *port,
                count: *count,
            })
            .collect()
    }

    /// Per-platform counts restricted to `ports`. Platforms exposing none
    /// of them are left out.
    pub fn open_ports_by_platform(&self, ports: &[u16]) -> PortsByPlatform {
        self.platform_ports
            .iter()
            .filter_map(|(platform, counts)| {
                let wanted: BTreeMap<u16, u64> = counts
                    .iter()
                    .filter(|(port, _)| ports.contains(*port))
                    .map(|(port, count)| (*port, *count))
                    .collect();
                (!wanted.is_empty()).then(|| (platform.clone(), wanted))
            })
            .collect()
    }
}

/// Stream `collection` once and aggregate it.
pub async fn collect(store: &dyn HostStore, collection: &str) -> Result<InventoryStats> {
    let mut stats = InventoryStats::default();
    let mut batches = store.stream_hosts(collection, BATCH_SIZE);
    while let Some(batch) = batches.try_next().await? {
        for host in &batch {
            stats.observe(host);
        }
    }
    tracing::debug!(collection, hosts = stats.hosts, "collected inventory stats");
    Ok(stats)
}

/// Parse `"22,80, 443"` into ports.
pub fn parse_ports(list: &str) -> Result<Vec<u16>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>()
                .map_err(|_| anyhow::anyhow!("invalid port '{}'", s))
        })
        .collect()
}

/// Run the stats command: aggregate the configured collection and print it.
pub async fn run_stats(config: &Config, ports: &[u16]) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let collection = &config.stats.collection;
    let stats = collect(&store, collection).await?;

    println!("Host Inventory — Stats");
    println!("======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Collection:  {}", collection);
    println!("  Hosts:       {}", format_number(stats.hosts));

    if stats.hosts == 0 {
        println!();
        println!("  No hosts yet. Run `hinv run` first.");
        return Ok(());
    }

    let os = stats.os_distribution();
    if !os.is_empty() {
        println!();
        println!("  {:<32} {:>8}", "PLATFORM", "HOSTS");
        println!("  {}", "-".repeat(41));
        for row in &os {
            println!("  {:<32} {:>8}", row.platform, format_number(row.count));
        }
    }

    let days = config.stats.days_threshold;
    let split = stats.old_vs_new(days, Utc::now());
    println!();
    println!("  Last seen within {} days: {}", days, format_number(split.new));
    println!("  Older:                    {}", format_number(split.old));

    let open = stats.open_ports();
    if !open.is_empty() {
        println!();
        println!("  {:<8} {:>8}", "PORT", "HOSTS");
        println!("  {}", "-".repeat(17));
        for row in &open {
            println!("  {:<8} {:>8}", row.port, format_number(row.count));
        }
    }

    if !ports.is_empty() {
        let by_platform = stats.open_ports_by_platform(ports);
        println!();
        if by_platform.is_empty() {
            println!("  No host exposes ports {:?}.", ports);
        }
        for (platform, counts) in &by_platform {
            let cells: Vec<String> = counts
                .iter()
                .map(|(port, count)| format!("{}={}", port, count))
                .collect();
            println!("  {:<32} {}", platform, cells.join("  "));
        }
    }

    println!();
    Ok(())
}
