//! Streaming reconciliation of an endpoint's indexed documents against its
//! live listing.
//!
//! [`reconcile`] pulls one page of the index side and one page of the
//! live side per round, parks unmatched ids in a pending map, and emits an
//! event as soon as an id can be classified:
//!
//! - present on both sides: [`ScanEvent::Compare`];
//! - live only, index side exhausted: [`ScanEvent::Added`];
//! - indexed only, live side exhausted: [`ScanEvent::Removed`].
//!
//! Neither side is ever loaded in full. The function has no side effects
//! on the index; callers decide what a comparison means.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{AdapterError, IndexError};
use crate::models::{Cursor, DocumentDescriptor, Endpoint, LiveDocument, Page};
use crate::store::DocumentIndex;

/// One page of a live listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterPage {
    /// Adapter-level addresses of live documents.
    pub ids: Vec<String>,
    /// Continuation cursor; `None` when the listing is exhausted.
    pub next: Option<String>,
}

/// Protocol adapter for one endpoint.
///
/// `open`/`close` are reference counted: nested opens are cheap and only
/// the last close releases the session. Adapters that cannot paginate
/// return everything in one page with `next: None`.
#[async_trait]
pub trait EndpointAdapter: Send {
    fn endpoint(&self) -> &Endpoint;

    async fn open(&mut self) -> Result<(), AdapterError>;

    async fn close(&mut self) -> Result<(), AdapterError>;

    /// Checks that the endpoint is reachable without listing it.
    async fn test_connectivity(&mut self) -> Result<(), AdapterError>;

    async fn next_page(&mut self, cursor: Option<&str>) -> Result<AdapterPage, AdapterError>;

    /// Fetches one live document by its listing address.
    async fn fetch_document(&mut self, address: &str) -> Result<LiveDocument, AdapterError>;
}

/// Open-session counter shared by adapter implementations.
#[derive(Debug, Default)]
pub struct SessionCount(usize);

impl SessionCount {
    /// Registers an open; true for the first one.
    pub fn acquire(&mut self) -> bool {
        self.0 += 1;
        self.0 == 1
    }

    /// Registers a close; true when the last session was released.
    /// Closing more often than opening is a no-op.
    pub fn release(&mut self) -> bool {
        match self.0 {
            0 => false,
            n => {
                self.0 = n - 1;
                self.0 == 0
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.0 > 0
    }
}

/// Paged reference view of an endpoint's indexed documents.
#[async_trait]
pub trait ReferencePages: Sync {
    async fn reference_page(
        &self,
        endpoint: &str,
        cursor: &Cursor,
    ) -> Result<Page<DocumentDescriptor>, IndexError>;
}

#[async_trait]
impl<T: DocumentIndex + ?Sized> ReferencePages for T {
    async fn reference_page(
        &self,
        endpoint: &str,
        cursor: &Cursor,
    ) -> Result<Page<DocumentDescriptor>, IndexError> {
        self.get_page(Some(endpoint), cursor).await
    }
}

/// Classified outcome for one document id.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Added(LiveDocument),
    Removed(DocumentDescriptor),
    Compare {
        reference: DocumentDescriptor,
        live: LiveDocument,
    },
    /// The live listing continues at `cursor`.
    NextPage { cursor: String },
    /// Non-fatal failure of a page or of one document.
    Error { id: String, message: String },
}

/// Counters of one [`reconcile`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub compared: usize,
    pub removed: usize,
    pub errors: usize,
    /// False when the adapter could not be opened.
    pub reachable: bool,
    /// False when a live page failed; no removals are emitted then.
    pub complete: bool,
}

#[derive(Default)]
struct Pending {
    reference: Option<DocumentDescriptor>,
    live: Option<LiveDocument>,
}

struct Merge<'a, F> {
    endpoint: &'a str,
    pending: BTreeMap<String, Pending>,
    /// Ids already classified; each id yields at most one event.
    emitted: HashSet<String>,
    failed_addresses: HashSet<String>,
    summary: ReconcileSummary,
    sink: F,
}

impl<F: FnMut(ScanEvent)> Merge<'_, F> {
    /// Pending slot for `id`, or `None` when `id` was already classified.
    fn slot(&mut self, id: &str, side: &str) -> Option<&mut Pending> {
        if self.emitted.contains(id) {
            debug!(endpoint = self.endpoint, document = id, side, "skipping already classified document");
            return None;
        }
        Some(self.pending.entry(id.to_string()).or_default())
    }

    fn error(&mut self, id: String, message: String) {
        self.summary.errors += 1;
        (self.sink)(ScanEvent::Error { id, message });
    }

    /// Emits every pending entry that can be classified given which sides
    /// are still active.
    fn drain(&mut self, reference_active: bool, live_active: bool) {
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| match (&p.reference, &p.live) {
                (Some(_), Some(_)) => true,
                (None, Some(_)) => !reference_active,
                (Some(_), None) => !live_active,
                (None, None) => true,
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in ready {
            let Some(entry) = self.pending.remove(&id) else {
                continue;
            };
            self.emitted.insert(id);
            match (entry.reference, entry.live) {
                (Some(reference), Some(live)) => {
                    self.summary.compared += 1;
                    (self.sink)(ScanEvent::Compare { reference, live });
                }
                (None, Some(live)) => {
                    self.summary.added += 1;
                    (self.sink)(ScanEvent::Added(live));
                }
                (Some(reference), None) => {
                    if !self.summary.complete || self.failed_addresses.contains(&reference.address)
                    {
                        debug!(
                            endpoint = self.endpoint,
                            document = %reference.id,
                            "keeping document not confirmed by a partial listing"
                        );
                        continue;
                    }
                    self.summary.removed += 1;
                    (self.sink)(ScanEvent::Removed(reference));
                }
                (None, None) => {}
            }
        }
    }
}

/// Reconciles `endpoint`'s indexed documents against `adapter`'s live
/// listing, streaming classified events into `sink`.
///
/// An adapter that fails to open counts as an empty, complete listing, so
/// every indexed document of the endpoint is reported removed. A failed
/// live page ends the live side without removals; a failed fetch is
/// reported and its indexed counterpart is kept. Index failures abort the
/// run. The adapter is closed in every case.
pub async fn reconcile<R, F>(
    reference: &R,
    adapter: &mut dyn EndpointAdapter,
    endpoint: &str,
    page_size: usize,
    sink: F,
) -> Result<ReconcileSummary, IndexError>
where
    R: ReferencePages + ?Sized,
    F: FnMut(ScanEvent),
{
    let mut merge = Merge {
        endpoint,
        pending: BTreeMap::new(),
        emitted: HashSet::new(),
        failed_addresses: HashSet::new(),
        summary: ReconcileSummary {
            reachable: true,
            complete: true,
            ..Default::default()
        },
        sink,
    };

    if let Err(e) = adapter.open().await {
        warn!(endpoint, error = %e, "endpoint unreachable, treating live listing as empty");
        merge.summary.reachable = false;
    }

    let result = run_merge(reference, adapter, page_size.max(1), &mut merge).await;

    if let Err(e) = adapter.close().await {
        warn!(endpoint, error = %e, "failed to close adapter");
    }

    result.map(|_| merge.summary)
}

async fn run_merge<R, F>(
    reference: &R,
    adapter: &mut dyn EndpointAdapter,
    page_size: usize,
    merge: &mut Merge<'_, F>,
) -> Result<(), IndexError>
where
    R: ReferencePages + ?Sized,
    F: FnMut(ScanEvent),
{
    let endpoint = merge.endpoint;
    let mut reference_active = true;
    let mut live_active = merge.summary.reachable;
    let mut reference_cursor = Cursor::first(page_size);
    let mut live_cursor: Option<String> = None;

    while reference_active || live_active {
        if reference_active {
            let page = reference.reference_page(endpoint, &reference_cursor).await?;
            for descriptor in page.items {
                if let Some(entry) = merge.slot(&descriptor.id, "index") {
                    if entry.reference.is_none() {
                        entry.reference = Some(descriptor);
                    }
                }
            }
            match page.next {
                Some(key) => reference_cursor = Cursor::after(key, page_size),
                None => reference_active = false,
            }
        }

        if live_active {
            match adapter.next_page(live_cursor.as_deref()).await {
                Ok(page) => {
                    for address in page.ids {
                        match adapter.fetch_document(&address).await {
                            Ok(live) => {
                                let id = live.descriptor.id.clone();
                                if let Some(entry) = merge.slot(&id, "live") {
                                    if entry.live.is_none() {
                                        entry.live = Some(live);
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(endpoint, document = %address, error = %e, "failed to fetch document");
                                merge.failed_addresses.insert(address.clone());
                                merge.error(address, e.to_string());
                            }
                        }
                    }
                    match page.next {
                        Some(cursor) => {
                            (merge.sink)(ScanEvent::NextPage {
                                cursor: cursor.clone(),
                            });
                            live_cursor = Some(cursor);
                        }
                        None => live_active = false,
                    }
                }
                Err(e) => {
                    warn!(endpoint, error = %e, "failed to read live listing page");
                    merge.summary.complete = false;
                    live_active = false;
                    merge.error(endpoint.to_string(), e.to_string());
                }
            }
        }

        merge.drain(reference_active, live_active);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryIndex;

    fn endpoint() -> Endpoint {
        Endpoint {
            name: "live".into(),
            url: "mem://live".into(),
            protocol: "directory".into(),
            version: None,
        }
    }

    fn descriptor(id: &str) -> DocumentDescriptor {
        DocumentDescriptor {
            endpoint: "live".into(),
            id: id.into(),
            id_short: id.to_uppercase(),
            address: format!("addr-{}", id),
            checksum: 7,
            timestamp: 0,
            readonly: false,
            online_ready: false,
            parent_id: None,
            asset_id: None,
            thumbnail: None,
        }
    }

    struct FakeAdapter {
        endpoint: Endpoint,
        ids: Vec<String>,
        page_size: usize,
        fail_open: bool,
        fail_page: Option<usize>,
        fail_fetch: HashSet<String>,
        sessions: SessionCount,
        closes: usize,
    }

    impl FakeAdapter {
        fn new(ids: &[String], page_size: usize) -> Self {
            Self {
                endpoint: endpoint(),
                ids: ids.to_vec(),
                page_size,
                fail_open: false,
                fail_page: None,
                fail_fetch: HashSet::new(),
                sessions: SessionCount::default(),
                closes: 0,
            }
        }
    }

    #[async_trait]
    impl EndpointAdapter for FakeAdapter {
        fn endpoint(&self) -> &Endpoint {
            &self.endpoint
        }

        async fn open(&mut self) -> Result<(), AdapterError> {
            if self.fail_open {
                return Err(AdapterError::Connectivity("offline".into()));
            }
            self.sessions.acquire();
            Ok(())
        }

        async fn close(&mut self) -> Result<(), AdapterError> {
            self.closes += 1;
            self.sessions.release();
            Ok(())
        }

        async fn test_connectivity(&mut self) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn next_page(&mut self, cursor: Option<&str>) -> Result<AdapterPage, AdapterError> {
            let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            if self.fail_page == Some(start) {
                return Err(AdapterError::Listing("broken page".into()));
            }
            let end = (start + self.page_size).min(self.ids.len());
            Ok(AdapterPage {
                ids: self.ids[start..end]
                    .iter()
                    .map(|id| format!("addr-{}", id))
                    .collect(),
                next: (end < self.ids.len()).then(|| end.to_string()),
            })
        }

        async fn fetch_document(&mut self, address: &str) -> Result<LiveDocument, AdapterError> {
            if self.fail_fetch.contains(address) {
                return Err(AdapterError::Document {
                    id: address.into(),
                    message: "corrupt".into(),
                });
            }
            let id = address.trim_start_matches("addr-");
            Ok(LiveDocument {
                descriptor: descriptor(id),
                content: None,
            })
        }
    }

    async fn index_with(ids: &[String]) -> MemoryIndex {
        let index = MemoryIndex::new();
        index.add_endpoint(&endpoint()).await.unwrap();
        for id in ids {
            index.upsert(&descriptor(id), None).await.unwrap();
        }
        index
    }

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{:02}", prefix, i)).collect()
    }

    #[derive(Default)]
    struct Collected {
        added: Vec<String>,
        removed: Vec<String>,
        compared: Vec<String>,
        errors: Vec<String>,
        pages: usize,
    }

    async fn run(index: &MemoryIndex, adapter: &mut FakeAdapter, page_size: usize) -> (Collected, ReconcileSummary) {
        let mut collected = Collected::default();
        let summary = reconcile(index, adapter, "live", page_size, |event| match event {
            ScanEvent::Added(live) => collected.added.push(live.descriptor.id),
            ScanEvent::Removed(d) => collected.removed.push(d.id),
            ScanEvent::Compare { reference, live } => {
                assert_eq!(reference.id, live.descriptor.id);
                collected.compared.push(reference.id);
            }
            ScanEvent::Error { id, .. } => collected.errors.push(id),
            ScanEvent::NextPage { .. } => collected.pages += 1,
        })
        .await
        .unwrap();
        for list in [
            &mut collected.added,
            &mut collected.removed,
            &mut collected.compared,
        ] {
            list.sort();
        }
        (collected, summary)
    }

    #[tokio::test]
    async fn test_completeness_across_page_sizes() {
        let only_index = ids("i", 5);
        let only_live = ids("l", 7);
        let both = ids("b", 6);

        let indexed: Vec<String> = only_index.iter().chain(&both).cloned().collect();
        let live: Vec<String> = both.iter().rev().chain(&only_live).cloned().collect();

        for index_page in [1, 2, 3, 5, 100] {
            for live_page in [1, 4, 6, 100] {
                let index = index_with(&indexed).await;
                let mut adapter = FakeAdapter::new(&live, live_page);
                let (events, summary) = run(&index, &mut adapter, index_page).await;

                assert_eq!(events.removed, only_index, "pages {}/{}", index_page, live_page);
                assert_eq!(events.added, only_live);
                assert_eq!(events.compared, both);
                assert!(events.errors.is_empty());
                assert_eq!(summary.added + summary.removed + summary.compared, 18);
                assert_eq!(events.pages, (live.len() - 1) / live_page);
                assert_eq!(adapter.closes, 1);
                assert!(!adapter.sessions.is_open());
            }
        }
    }

    #[tokio::test]
    async fn test_single_page_listing() {
        let index = index_with(&[]).await;
        let mut adapter = FakeAdapter::new(&ids("d", 1), usize::MAX / 2);
        let (events, summary) = run(&index, &mut adapter, 10).await;
        assert_eq!(events.added, vec!["d00".to_string()]);
        assert!(summary.reachable && summary.complete);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_removes_everything() {
        let index = index_with(&ids("d", 1)).await;
        let mut adapter = FakeAdapter::new(&[], 10);
        adapter.fail_open = true;
        let (events, summary) = run(&index, &mut adapter, 10).await;
        assert_eq!(events.removed, vec!["d00".to_string()]);
        assert!(!summary.reachable);
        assert_eq!(adapter.closes, 1);
    }

    #[tokio::test]
    async fn test_failed_page_suppresses_removals() {
        let indexed = ids("d", 6);
        let index = index_with(&indexed).await;
        let mut adapter = FakeAdapter::new(&indexed[..4], 2);
        adapter.fail_page = Some(2);
        let (events, summary) = run(&index, &mut adapter, 3).await;
        assert_eq!(events.compared, indexed[..2].to_vec());
        assert!(events.removed.is_empty());
        assert_eq!(events.errors, vec!["live".to_string()]);
        assert!(!summary.complete);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_indexed_document() {
        let indexed = ids("d", 3);
        let index = index_with(&indexed).await;
        let mut adapter = FakeAdapter::new(&indexed, 10);
        adapter.fail_fetch.insert("addr-d01".into());
        let (events, summary) = run(&index, &mut adapter, 10).await;
        assert_eq!(events.compared, vec!["d00".to_string(), "d02".to_string()]);
        assert!(events.removed.is_empty());
        assert_eq!(events.errors, vec!["addr-d01".to_string()]);
        assert_eq!(summary.errors, 1);
    }

    #[tokio::test]
    async fn test_repeated_live_id_is_classified_once() {
        let listing: Vec<String> = ["a", "b", "a"].iter().map(|s| s.to_string()).collect();

        let index = index_with(&[]).await;
        let mut adapter = FakeAdapter::new(&listing, 1);
        let (events, summary) = run(&index, &mut adapter, 1).await;
        assert_eq!(events.added, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(summary.added, 2);

        let index = index_with(&["a".to_string()]).await;
        let mut adapter = FakeAdapter::new(&listing, 1);
        let (events, summary) = run(&index, &mut adapter, 1).await;
        assert_eq!(events.compared, vec!["a".to_string()]);
        assert_eq!(events.added, vec!["b".to_string()]);
        assert!(events.removed.is_empty());
        assert_eq!(summary.compared + summary.added, 2);
    }

    #[tokio::test]
    async fn test_repeated_id_across_large_pages() {
        let mut listing = ids("d", 4);
        listing.extend(ids("d", 4));
        let index = index_with(&ids("d", 2)).await;
        let mut adapter = FakeAdapter::new(&listing, 3);
        let (events, _) = run(&index, &mut adapter, 2).await;
        assert_eq!(events.compared, ids("d", 2));
        assert_eq!(events.added, vec!["d02".to_string(), "d03".to_string()]);
        assert!(events.removed.is_empty());
    }

    #[test]
    fn test_session_count() {
        let mut count = SessionCount::default();
        assert!(count.acquire());
        assert!(!count.acquire());
        assert!(!count.release());
        assert!(count.release());
        assert!(!count.release());
        assert!(!count.is_open());
    }
}
