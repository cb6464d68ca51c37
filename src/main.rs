//! # Host Inventory CLI (`hinv`)
//!
//! ## Usage
//!
//! ```bash
//! hinv --config ./config/hinv.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hinv init` | Create the SQLite database and run schema migrations |
//! | `hinv sources` | List configured sources, token status and record counts |
//! | `hinv run` | Fetch, normalize and deduplicate every configured source |
//! | `hinv run --stage dedup` | Run a single stage |
//! | `hinv stats` | Print inventory statistics |
//! | `hinv reset` | Delete every stored record |
//! | `hinv serve` | Start the HTTP API |
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG=debug` for
//! per-page and per-group detail.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use host_inventory::config;
use host_inventory::db;
use host_inventory::migrate;
use host_inventory::pipeline::{Pipeline, Stage};
use host_inventory::progress::ProgressMode;
use host_inventory::server;
use host_inventory::sources;
use host_inventory::stats;

/// Host Inventory: pull hosts from security vendors into one deduplicated
/// inventory.
#[derive(Parser)]
#[command(
    name = "hinv",
    about = "Host Inventory — fetch, normalize and deduplicate hosts from security vendors",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hinv.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List configured sources and what is stored for them.
    Sources,

    /// Run the pipeline.
    ///
    /// Exits non-zero and lists every failed source when any source fails.
    /// Records committed by the other sources are kept.
    Run {
        /// Run only this stage.
        #[arg(long, value_enum)]
        stage: Option<Stage>,

        /// Progress on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print inventory statistics for `[stats].collection`.
    Stats {
        /// Also break these ports down by platform (e.g. `22,80,443`).
        #[arg(long)]
        ports: Option<String>,
    },

    /// Delete every raw and canonical record.
    Reset {
        /// Required; there is no undo.
        #[arg(long)]
        yes: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = Arc::new(config::load_config(&cli.config)?);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Run { stage, progress } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let pipeline = Pipeline::open(cfg.clone())
                .await?
                .with_progress(progress.reporter());
            let report = match stage {
                Some(stage) => pipeline.run_stage(stage).await,
                None => pipeline.run().await,
            };

            for stage in &report.stages {
                for source in &stage.sources {
                    println!("{:<10} {:<16} {:?}", stage.stage, source.source, source.outcome);
                }
            }
            let failures = report.failures();
            if !failures.is_empty() {
                for (stage, source, error) in &failures {
                    eprintln!("failed: {} {}: {}", stage, source, error);
                }
                let names: Vec<String> = failures
                    .iter()
                    .map(|(stage, source, _)| format!("{source} ({stage})"))
                    .collect();
                anyhow::bail!("pipeline run failed for: {}", names.join(", "));
            }
        }
        Commands::Stats { ports } => {
            let ports = match ports {
                Some(list) => stats::parse_ports(&list)?,
                None => Vec::new(),
            };
            stats::run_stats(&cfg, &ports).await?;
        }
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete every record without --yes");
            }
            let pool = db::connect(&cfg).await?;
            let (raw, hosts) = migrate::reset(&pool).await?;
            println!("Deleted {} raw records and {} hosts.", raw, hosts);
        }
        Commands::Serve => {
            let pipeline = Pipeline::open(cfg.clone()).await?;
            server::run_server(pipeline).await?;
        }
    }

    Ok(())
}
