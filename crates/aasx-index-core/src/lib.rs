//! # aasx-index-core
//!
//! Runtime-free core of the AASX document index: the data model, the
//! document content model and its checksum, the query language with its
//! two compilation targets, the [`store::DocumentIndex`] trait with an
//! in-memory implementation, and the streaming reconciliation of an
//! endpoint against its live listing.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Keys, descriptors, element rows, cursors, pages |
//! | [`content`] | AAS environment model and element-row flattening |
//! | [`checksum`] | Canonical CRC-32 of document content |
//! | [`query`] | Filter parser, in-memory predicate, SQL fragment |
//! | [`store`] | `DocumentIndex` trait and `MemoryIndex` |
//! | [`scanner`] | `EndpointAdapter` trait and `reconcile` |
//! | [`error`] | Typed errors |
//!
//! Nothing here depends on tokio, a database driver, or the filesystem;
//! the `aasx-index` crate supplies those.

pub mod checksum;
pub mod content;
pub mod error;
pub mod models;
pub mod query;
pub mod scanner;
pub mod store;
