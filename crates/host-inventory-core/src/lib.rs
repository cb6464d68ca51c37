//! # Host Inventory Core
//!
//! Runtime-independent logic for the host-inventory pipeline: the canonical
//! model, safe payload lookup, per-source normalizers, the merge resolver
//! and the storage contracts.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O. The
//! `host-inventory` crate supplies those.

pub mod lookup;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod store;
