//! Storage abstraction for the document index.
//!
//! The [`DocumentIndex`] trait defines every operation the scanner, the
//! worker pool coordinator, and the read API need, so that backends are
//! interchangeable (in-memory, JSON file, SQLite). All backends share one
//! pagination contract:
//!
//! - items are ordered by [`DocumentKey`] (endpoint, then id);
//! - `cursor.previous` walks forward (items strictly after the key);
//! - `cursor.next` walks backward (items strictly before the key, still
//!   returned in ascending order);
//! - `page.previous`/`page.next` are `None` exactly when nothing further
//!   exists in that direction.
//!
//! Implementations must be `Send + Sync`; writes for the same key are
//! serialized by the backend.

pub mod memory;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::{Cursor, DocumentDescriptor, DocumentKey, ElementRow, Endpoint, Page};

/// Abstract document index backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_page`](DocumentIndex::get_page) | Keyset page, optionally scoped to one endpoint |
/// | [`query`](DocumentIndex::query) | Keyset page filtered by a query expression |
/// | [`find`](DocumentIndex::find) | Point lookup |
/// | [`upsert`](DocumentIndex::upsert) | Insert or replace a descriptor (and its element rows) |
/// | [`remove`](DocumentIndex::remove) | Remove one document or a whole endpoint's documents |
/// | [`list_endpoint_documents`](DocumentIndex::list_endpoint_documents) | Unpaginated endpoint listing |
/// | [`add_endpoint`](DocumentIndex::add_endpoint) / [`remove_endpoint`](DocumentIndex::remove_endpoint) | Endpoint registry |
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Returns at most `cursor.limit` descriptors in key order.
    async fn get_page(
        &self,
        endpoint: Option<&str>,
        cursor: &Cursor,
    ) -> Result<Page<DocumentDescriptor>, IndexError>;

    /// Like [`get_page`](DocumentIndex::get_page) across all endpoints, but
    /// only returns documents matching `filter`. A blank filter means no
    /// filter; a malformed one matches nothing.
    async fn query(
        &self,
        cursor: &Cursor,
        filter: Option<&str>,
        language: Option<&str>,
    ) -> Result<Page<DocumentDescriptor>, IndexError>;

    /// Looks up a document. Without an endpoint, the first document with
    /// this id in key order is returned.
    async fn find(
        &self,
        endpoint: Option<&str>,
        id: &str,
    ) -> Result<Option<DocumentDescriptor>, IndexError>;

    /// Inserts or replaces a descriptor. `rows: Some(..)` replaces the
    /// document's element rows; `None` keeps the existing ones. Fails with
    /// [`IndexError::EndpointNotFound`] for an unregistered endpoint.
    async fn upsert(
        &self,
        descriptor: &DocumentDescriptor,
        rows: Option<&[ElementRow]>,
    ) -> Result<(), IndexError>;

    /// Removes `(endpoint, id)`; with only an endpoint, all of its
    /// documents; with only an id, the first match. Returns whether
    /// anything was removed.
    async fn remove(&self, endpoint: Option<&str>, id: Option<&str>) -> Result<bool, IndexError>;

    /// All documents of one endpoint, in key order.
    async fn list_endpoint_documents(
        &self,
        endpoint: &str,
    ) -> Result<Vec<DocumentDescriptor>, IndexError>;

    /// Element rows of one document.
    async fn element_rows(&self, key: &DocumentKey) -> Result<Vec<ElementRow>, IndexError>;

    async fn endpoints(&self) -> Result<Vec<Endpoint>, IndexError>;

    async fn find_endpoint(&self, name: &str) -> Result<Option<Endpoint>, IndexError>;

    /// Registers an endpoint; fails with [`IndexError::EndpointExists`].
    async fn add_endpoint(&self, endpoint: &Endpoint) -> Result<(), IndexError>;

    /// Unregisters an endpoint and removes its documents; fails with
    /// [`IndexError::EndpointNotFound`].
    async fn remove_endpoint(&self, name: &str) -> Result<(), IndexError>;
}
