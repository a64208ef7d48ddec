//! In-memory [`DocumentIndex`] implementation.
//!
//! Uses `BTreeMap`s behind `std::sync::RwLock`; keyset pagination walks
//! the ordered key range directly. The JSON-file backend wraps this type
//! and persists [`IndexSnapshot`]s; tests use it on its own.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::models::{
    Cursor, Direction, DocumentDescriptor, DocumentKey, ElementRow, Endpoint, Page,
};
use crate::query::{normalize_filter, Predicate};

use super::DocumentIndex;

/// Serializable content of an index: three flat collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub documents: Vec<DocumentDescriptor>,
    #[serde(default)]
    pub elements: Vec<ElementRow>,
}

#[derive(Default)]
struct State {
    endpoints: BTreeMap<String, Endpoint>,
    documents: BTreeMap<DocumentKey, DocumentDescriptor>,
    elements: HashMap<DocumentKey, Vec<ElementRow>>,
}

impl State {
    fn rows(&self, key: &DocumentKey) -> &[ElementRow] {
        self.elements.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn remove_document(&mut self, key: &DocumentKey) -> bool {
        self.elements.remove(key);
        self.documents.remove(key).is_some()
    }

    fn remove_endpoint_documents(&mut self, endpoint: &str) -> bool {
        let keys: Vec<DocumentKey> = self
            .documents
            .keys()
            .filter(|k| k.endpoint == endpoint)
            .cloned()
            .collect();
        for key in &keys {
            self.remove_document(key);
        }
        !keys.is_empty()
    }
}

impl From<IndexSnapshot> for State {
    fn from(snapshot: IndexSnapshot) -> Self {
        let mut state = State::default();
        for endpoint in snapshot.endpoints {
            state.endpoints.insert(endpoint.name.clone(), endpoint);
        }
        for document in snapshot.documents {
            state.documents.insert(document.key(), document);
        }
        for row in snapshot.elements {
            if state.documents.contains_key(&row.document) {
                state
                    .elements
                    .entry(row.document.clone())
                    .or_default()
                    .push(row);
            }
        }
        state
    }
}

/// In-memory index for tests and as the engine of the file backend.
pub struct MemoryIndex {
    state: RwLock<State>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Builds an index from a snapshot. Element rows whose document is
    /// missing are dropped.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        Self {
            state: RwLock::new(State::from(snapshot)),
        }
    }

    /// Replaces the whole content with `snapshot`.
    pub fn restore(&self, snapshot: IndexSnapshot) {
        *self.state.write().unwrap() = State::from(snapshot);
    }

    /// Copies the current content into a snapshot, in key order.
    pub fn snapshot(&self) -> IndexSnapshot {
        let state = self.state.read().unwrap();
        IndexSnapshot {
            endpoints: state.endpoints.values().cloned().collect(),
            documents: state.documents.values().cloned().collect(),
            elements: state
                .documents
                .keys()
                .flat_map(|k| state.rows(k).iter().cloned())
                .collect(),
        }
    }

    pub fn document_count(&self) -> usize {
        self.state.read().unwrap().documents.len()
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks `documents` ascending from `from`, restricted to `endpoint`.
fn ascending<'a>(
    documents: &'a BTreeMap<DocumentKey, DocumentDescriptor>,
    endpoint: Option<&'a str>,
    from: Bound<DocumentKey>,
) -> impl Iterator<Item = &'a DocumentDescriptor> + 'a {
    documents
        .range((from, Bound::Unbounded))
        .skip_while(move |(k, _)| endpoint.is_some_and(|e| k.endpoint.as_str() < e))
        .take_while(move |(k, _)| endpoint.map_or(true, |e| k.endpoint == e))
        .map(|(_, d)| d)
}

/// Walks `documents` descending from `to`, restricted to `endpoint`.
fn descending<'a>(
    documents: &'a BTreeMap<DocumentKey, DocumentDescriptor>,
    endpoint: Option<&'a str>,
    to: Bound<DocumentKey>,
) -> impl Iterator<Item = &'a DocumentDescriptor> + 'a {
    documents
        .range((Bound::Unbounded, to))
        .rev()
        .skip_while(move |(k, _)| endpoint.is_some_and(|e| k.endpoint.as_str() > e))
        .take_while(move |(k, _)| endpoint.map_or(true, |e| k.endpoint == e))
        .map(|(_, d)| d)
}

/// Keyset pagination over an ordered descriptor map.
pub fn paginate<F>(
    documents: &BTreeMap<DocumentKey, DocumentDescriptor>,
    endpoint: Option<&str>,
    cursor: &Cursor,
    matches: F,
) -> Page<DocumentDescriptor>
where
    F: Fn(&DocumentDescriptor) -> bool,
{
    let limit = cursor.limit.max(1);

    match cursor.direction() {
        Direction::Forward(after) => {
            let from = match (after, endpoint) {
                (Some(key), _) => Bound::Excluded(key.clone()),
                (None, Some(e)) => Bound::Included(DocumentKey::new(e, "")),
                (None, None) => Bound::Unbounded,
            };
            let mut items: Vec<DocumentDescriptor> = ascending(documents, endpoint, from)
                .filter(|d| matches(d))
                .take(limit + 1)
                .cloned()
                .collect();

            let mut next = None;
            if items.len() > limit {
                items.truncate(limit);
                next = items.last().map(DocumentDescriptor::key);
            }
            let previous = items.first().map(DocumentDescriptor::key).filter(|first| {
                descending(documents, endpoint, Bound::Excluded(first.clone())).any(&matches)
            });
            Page {
                previous,
                next,
                items,
            }
        }
        Direction::Backward(before) => {
            let mut items: Vec<DocumentDescriptor> =
                descending(documents, endpoint, Bound::Excluded(before.clone()))
                    .filter(|d| matches(d))
                    .take(limit + 1)
                    .cloned()
                    .collect();

            let mut previous = None;
            if items.len() > limit {
                items.truncate(limit);
                previous = items.last().map(DocumentDescriptor::key);
            }
            items.reverse();
            let next = items.last().map(DocumentDescriptor::key).filter(|last| {
                ascending(documents, endpoint, Bound::Excluded(last.clone())).any(&matches)
            });
            Page {
                previous,
                next,
                items,
            }
        }
    }
}

#[async_trait]
impl DocumentIndex for MemoryIndex {
    async fn get_page(
        &self,
        endpoint: Option<&str>,
        cursor: &Cursor,
    ) -> Result<Page<DocumentDescriptor>, IndexError> {
        let state = self.state.read().unwrap();
        Ok(paginate(&state.documents, endpoint, cursor, |_| true))
    }

    async fn query(
        &self,
        cursor: &Cursor,
        filter: Option<&str>,
        language: Option<&str>,
    ) -> Result<Page<DocumentDescriptor>, IndexError> {
        let state = self.state.read().unwrap();
        let Some(filter) = normalize_filter(filter) else {
            return Ok(paginate(&state.documents, None, cursor, |_| true));
        };
        let predicate = Predicate::compile(filter, language);
        if !predicate.is_valid() {
            return Ok(Page::empty());
        }
        Ok(paginate(&state.documents, None, cursor, |d| {
            predicate.matches(d, state.rows(&d.key()))
        }))
    }

    async fn find(
        &self,
        endpoint: Option<&str>,
        id: &str,
    ) -> Result<Option<DocumentDescriptor>, IndexError> {
        let state = self.state.read().unwrap();
        Ok(match endpoint {
            Some(e) => state.documents.get(&DocumentKey::new(e, id)).cloned(),
            None => state.documents.values().find(|d| d.id == id).cloned(),
        })
    }

    async fn upsert(
        &self,
        descriptor: &DocumentDescriptor,
        rows: Option<&[ElementRow]>,
    ) -> Result<(), IndexError> {
        let mut state = self.state.write().unwrap();
        if !state.endpoints.contains_key(&descriptor.endpoint) {
            return Err(IndexError::EndpointNotFound(descriptor.endpoint.clone()));
        }
        let key = descriptor.key();
        if let Some(rows) = rows {
            state.elements.insert(key.clone(), rows.to_vec());
        }
        state.documents.insert(key, descriptor.clone());
        Ok(())
    }

    async fn remove(&self, endpoint: Option<&str>, id: Option<&str>) -> Result<bool, IndexError> {
        let mut state = self.state.write().unwrap();
        Ok(match (endpoint, id) {
            (Some(e), Some(id)) => state.remove_document(&DocumentKey::new(e, id)),
            (Some(e), None) => state.remove_endpoint_documents(e),
            (None, Some(id)) => {
                let key = state.documents.keys().find(|k| k.id == id).cloned();
                match key {
                    Some(key) => state.remove_document(&key),
                    None => false,
                }
            }
            (None, None) => false,
        })
    }

    async fn list_endpoint_documents(
        &self,
        endpoint: &str,
    ) -> Result<Vec<DocumentDescriptor>, IndexError> {
        let state = self.state.read().unwrap();
        Ok(ascending(
            &state.documents,
            Some(endpoint),
            Bound::Included(DocumentKey::new(endpoint, "")),
        )
        .cloned()
        .collect())
    }

    async fn element_rows(&self, key: &DocumentKey) -> Result<Vec<ElementRow>, IndexError> {
        Ok(self.state.read().unwrap().rows(key).to_vec())
    }

    async fn endpoints(&self) -> Result<Vec<Endpoint>, IndexError> {
        Ok(self.state.read().unwrap().endpoints.values().cloned().collect())
    }

    async fn find_endpoint(&self, name: &str) -> Result<Option<Endpoint>, IndexError> {
        Ok(self.state.read().unwrap().endpoints.get(name).cloned())
    }

    async fn add_endpoint(&self, endpoint: &Endpoint) -> Result<(), IndexError> {
        let mut state = self.state.write().unwrap();
        if state.endpoints.contains_key(&endpoint.name) {
            return Err(IndexError::EndpointExists(endpoint.name.clone()));
        }
        state
            .endpoints
            .insert(endpoint.name.clone(), endpoint.clone());
        Ok(())
    }

    async fn remove_endpoint(&self, name: &str) -> Result<(), IndexError> {
        let mut state = self.state.write().unwrap();
        if state.endpoints.remove(name).is_none() {
            return Err(IndexError::EndpointNotFound(name.to_string()));
        }
        state.remove_endpoint_documents(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TypedValue;

    fn endpoint(name: &str) -> Endpoint {
        Endpoint {
            name: name.into(),
            url: format!("file:///{}", name),
            protocol: "directory".into(),
            version: None,
        }
    }

    fn doc(endpoint: &str, id: &str) -> DocumentDescriptor {
        DocumentDescriptor {
            endpoint: endpoint.into(),
            id: id.into(),
            id_short: format!("Short{}", id),
            address: format!("{}.json", id),
            checksum: 1,
            timestamp: 0,
            readonly: false,
            online_ready: false,
            parent_id: None,
            asset_id: None,
            thumbnail: None,
        }
    }

    async fn seeded(n: usize) -> MemoryIndex {
        let index = MemoryIndex::new();
        index.add_endpoint(&endpoint("a")).await.unwrap();
        index.add_endpoint(&endpoint("b")).await.unwrap();
        for i in 0..n {
            let e = if i % 2 == 0 { "a" } else { "b" };
            index.upsert(&doc(e, &format!("{:03}", i)), None).await.unwrap();
        }
        index
    }

    #[tokio::test]
    async fn test_forward_walk_visits_all() {
        let index = seeded(11).await;
        for limit in 1..=12 {
            let mut cursor = Cursor::first(limit);
            let mut seen = Vec::new();
            loop {
                let page = index.get_page(None, &cursor).await.unwrap();
                assert!(page.items.len() <= limit);
                seen.extend(page.items.iter().map(|d| d.key()));
                match page.next {
                    Some(key) => cursor = Cursor::after(key, limit),
                    None => break,
                }
            }
            assert_eq!(seen.len(), 11, "limit {}", limit);
            let mut sorted = seen.clone();
            sorted.sort();
            assert_eq!(seen, sorted);
        }
    }

    #[tokio::test]
    async fn test_backward_walk_visits_all() {
        let index = seeded(9).await;
        let last = DocumentKey::new("zzz", "");
        for limit in 1..=10 {
            let mut cursor = Cursor::before(last.clone(), limit);
            let mut seen = Vec::new();
            loop {
                let page = index.get_page(None, &cursor).await.unwrap();
                let keys: Vec<DocumentKey> = page.items.iter().map(|d| d.key()).collect();
                let mut sorted = keys.clone();
                sorted.sort();
                assert_eq!(keys, sorted, "page must be ascending");
                seen.extend(keys);
                match page.previous {
                    Some(key) => cursor = Cursor::before(key, limit),
                    None => break,
                }
            }
            assert_eq!(seen.len(), 9, "limit {}", limit);
        }
    }

    #[tokio::test]
    async fn test_boundaries() {
        let index = seeded(5).await;
        let first = index.get_page(None, &Cursor::first(2)).await.unwrap();
        assert_eq!(first.previous, None);
        assert!(first.next.is_some());

        let second = index
            .get_page(None, &Cursor::after(first.next.clone().unwrap(), 2))
            .await
            .unwrap();
        assert_eq!(second.previous, second.items.first().map(|d| d.key()));

        let back = index
            .get_page(None, &Cursor::before(second.previous.clone().unwrap(), 2))
            .await
            .unwrap();
        assert_eq!(back.items, first.items);
        assert_eq!(back.previous, None);
    }

    #[tokio::test]
    async fn test_endpoint_scope() {
        let index = seeded(7).await;
        let page = index.get_page(Some("b"), &Cursor::first(10)).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.items.iter().all(|d| d.endpoint == "b"));
        assert_eq!(page.next, None);
        assert_eq!(page.previous, None);

        let listed = index.list_endpoint_documents("a").await.unwrap();
        assert_eq!(listed.len(), 4);
    }

    #[tokio::test]
    async fn test_query_filters_with_rows() {
        let index = seeded(4).await;
        let key = DocumentKey::new("a", "000");
        let rows = vec![ElementRow {
            document: key.clone(),
            model_type: "prop".into(),
            id_short: "Speed".into(),
            language: None,
            value: Some(TypedValue::Number(10.0)),
        }];
        index.upsert(&doc("a", "000"), Some(&rows)).await.unwrap();

        let page = index
            .query(&Cursor::first(10), Some("#prop:Speed > 5"), None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].key(), key);

        let page = index.query(&Cursor::first(10), Some("  "), None).await.unwrap();
        assert_eq!(page.items.len(), 4);

        let page = index
            .query(&Cursor::first(10), Some("((bad"), None)
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_remove_variants_and_consistency() {
        let index = seeded(6).await;
        assert!(index.remove(Some("a"), Some("000")).await.unwrap());
        assert!(!index.remove(Some("a"), Some("000")).await.unwrap());
        assert!(index.remove(None, Some("001")).await.unwrap());
        assert!(index.remove(Some("b"), None).await.unwrap());
        assert!(!index.remove(None, None).await.unwrap());
        assert_eq!(index.document_count(), 2);

        let err = index.upsert(&doc("missing", "x"), None).await.unwrap_err();
        assert!(matches!(err, IndexError::EndpointNotFound(_)));
        let err = index.add_endpoint(&endpoint("a")).await.unwrap_err();
        assert!(matches!(err, IndexError::EndpointExists(_)));

        index.remove_endpoint("a").await.unwrap();
        assert_eq!(index.document_count(), 0);
        assert!(index.remove_endpoint("a").await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_drops_orphans() {
        let index = seeded(3).await;
        let mut snapshot = index.snapshot();
        snapshot.elements.push(ElementRow {
            document: DocumentKey::new("a", "ghost"),
            model_type: "prop".into(),
            id_short: "X".into(),
            language: None,
            value: None,
        });
        let restored = MemoryIndex::from_snapshot(snapshot);
        assert_eq!(restored.document_count(), 3);
        assert!(restored.snapshot().elements.is_empty());
    }
}
