//! # AASX Index
//!
//! A cursor-paginated index of Asset Administration Shell documents kept in
//! step with the endpoints that serve them.
//!
//! Endpoints (directories of `.aasx` packages, package servers, OPC UA
//! servers, registries) are reconciled against the index by scan tasks
//! running in a bounded pool of isolated units. Clients page through the
//! index with keyset cursors and filter it with a small query language
//! compiled either to an in-memory predicate or to SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Adapters   │──▶│ Worker pool │──▶│    Index     │
//! │ dir/http/ua │   │  reconcile  │   │ JSON / SQLite│
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                                     ┌──────▼──────┐
//!                                     │ IndexService│
//!                                     │  + CLI      │
//!                                     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! aasx-index init
//! aasx-index endpoint add samples file:///srv/aasx --protocol directory
//! aasx-index scan all
//! aasx-index list --filter '#prop:MaxRotationSpeed > 4000'
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`index`] | Backend selection |
//! | [`file_index`] | Embedded JSON-file backend |
//! | [`sqlite_index`] | SQLite backend |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`adapters`] | Adapter factory and shared helpers |
//! | [`scan`] | Scan task body and staleness policy |
//! | [`protocol`] | Worker message envelopes |
//! | [`pool`] | Bounded worker pool |
//! | [`tasks`] | Task ids and statistics |
//! | [`service`] | Composition root |
//! | [`progress`] | Scan progress on stderr |
//! | [`commands`] | CLI command handlers |

pub mod adapter_dir;
pub mod adapter_opc;
pub mod adapter_package;
pub mod adapter_registry;
pub mod adapters;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod file_index;
pub mod index;
pub mod migrate;
pub mod pool;
pub mod progress;
pub mod protocol;
pub mod scan;
pub mod service;
pub mod sqlite_index;
pub mod tasks;

pub use aasx_index_core as core;
