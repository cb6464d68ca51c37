//! # Host Inventory
//!
//! Pulls host listings from security vendors, maps them into one canonical
//! record shape and merges the records that describe the same machine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌────────────┐   ┌──────────┐
//! │ Connectors  │──▶│ raw_records│──▶│ Normalizers│──▶│  hosts   │
//! │ Qualys/CS   │   │  (SQLite)  │   │  (core)    │   │ (SQLite) │
//! └─────────────┘   └────────────┘   └────────────┘   └────┬─────┘
//!                                                           │ dedup
//!                                  ┌────────────────────────┤
//!                                  ▼                        ▼
//!                             ┌──────────┐            ┌──────────┐
//!                             │   CLI    │            │   HTTP   │
//!                             │  (hinv)  │            │  (axum)  │
//!                             └──────────┘            └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hinv init                 # create database
//! hinv run                  # fetch → normalize → dedup
//! hinv stats --ports 22,80  # inventory overview
//! hinv serve                # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Pipeline error taxonomy |
//! | [`traits`] | `HostSource` extension point and registry |
//! | [`connector`] | HTTP paging, sentinel handling, batching |
//! | [`connector_qualys`] | Qualys host API |
//! | [`connector_crowdstrike`] | CrowdStrike host API |
//! | [`retry`] | Bounded exponential backoff |
//! | [`pipeline`] | Stage orchestration and run reports |
//! | [`sqlite_store`] | SQLite raw and canonical stores |
//! | [`stats`] | Inventory statistics |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//!
//! The canonical model, normalizers, merger and store traits live in the
//! [`core`] crate.

pub mod config;
pub mod connector;
pub mod connector_crowdstrike;
pub mod connector_qualys;
pub mod db;
pub mod error;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod server;
pub mod sources;
pub mod sqlite_store;
pub mod stats;
pub mod traits;

pub use host_inventory_core as core;
