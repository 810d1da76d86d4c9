//! # fieldlens
//!
//! Capture a photo or a short recording, send it to a vertical's
//! classification endpoint, bucket the confidence into a tier, and keep the
//! results you care about in a per-vertical collection (garden, life-list,
//! portfolio).
//!
//! The runtime-free pipeline logic lives in [`fieldlens_core`]; this crate is
//! the native host around it.
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │ capture  │──▶│ validator │──▶│ classifier │──▶│   tier   │
//! │ CLI/HTTP │   │  (core)   │   │  (reqwest) │   │  (core)  │
//! └──────────┘   └───────────┘   └────────────┘   └────┬─────┘
//!                                                      │ save
//!                                                      ▼
//!                                                ┌────────────┐
//!                                                │ collection │
//!                                                │  (SQLite)  │
//!                                                └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and vertical definitions |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`analysis`] | Multipart HTTP classifier |
//! | [`pipeline`] | Async driver for the capture state machine |
//! | [`collection`] | Per-vertical collection store |
//! | [`sqlite_store`] | SQLite collection backend |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema setup |

pub mod analysis;
pub mod collection;
pub mod collection_cmd;
pub mod config;
pub mod db;
pub mod identify;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod server;
pub mod sqlite_store;
pub mod verticals;

pub use fieldlens_core;
