use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create tables and indexes. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Raw provider payloads; `id` gives insertion order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            source TEXT NOT NULL,
            payload TEXT NOT NULL,
            fetched_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Canonical hosts; timestamps are epoch millis, collections are JSON
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hosts (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            collection TEXT NOT NULL,
            hostname TEXT,
            local_ip TEXT,
            external_ip TEXT,
            mac_address TEXT,
            provider TEXT,
            os_version TEXT,
            platform TEXT,
            first_seen_at INTEGER,
            last_seen_at INTEGER,
            open_ports_count INTEGER,
            vuln_count INTEGER,
            open_ports TEXT NOT NULL DEFAULT '[]',
            software TEXT NOT NULL DEFAULT '[]',
            sources TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_raw_records_collection ON raw_records(collection, id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_hosts_collection ON hosts(collection, seq)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_hosts_platform ON hosts(platform)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_hosts_last_seen_at ON hosts(last_seen_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete every record in every collection. Returns `(raw, hosts)` counts.
pub async fn reset(pool: &SqlitePool) -> Result<(u64, u64)> {
    let mut tx = pool.begin().await?;
    let raw = sqlx::query("DELETE FROM raw_records")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    let hosts = sqlx::query("DELETE FROM hosts")
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    tracing::info!(raw, hosts, "cleared all collections");
    Ok((raw, hosts))
}
