//! Index service: the composition root tying the index, adapters, worker
//! pool, and task tracker together.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get_documents`](IndexService::get_documents) | Filtered keyset page of descriptors |
//! | [`get_document`](IndexService::get_document) | One descriptor plus its live content |
//! | [`add_endpoint`](IndexService::add_endpoint) / [`remove_endpoint`](IndexService::remove_endpoint) | Endpoint registry |
//! | [`scan_endpoint`](IndexService::scan_endpoint) / [`scan_all`](IndexService::scan_all) | Submit reconciliation tasks |
//! | [`apply`](IndexService::apply) | Write one task event into the index |
//! | [`run_until_complete`](IndexService::run_until_complete) | Drive events until given tasks end |
//! | [`run_scheduler`](IndexService::run_scheduler) | Periodic scans until shutdown |
//!
//! Results of scans are applied by the coordinator only: units read the
//! index, the service writes it.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use aasx_index_core::content::Environment;
use aasx_index_core::error::IndexError;
use aasx_index_core::models::{Cursor, DocumentDescriptor, Endpoint, Page};
use aasx_index_core::store::DocumentIndex;

use crate::adapters::AdapterFactory;
use crate::config::Config;
use crate::error::ServiceError;
use crate::index::{open_index, Backend};
use crate::pool::{TaskEvent, TaskEventKind, TaskPayload, WorkerContext, WorkerPool};
use crate::protocol::{ScanTask, TaskId, TaskKind};
use crate::tasks::{EndpointStatistics, TaskTracker};

/// Connection details of an endpoint to register.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    pub url: String,
    pub protocol: String,
    pub version: Option<String>,
}

pub struct IndexService {
    config: Config,
    backend: Backend,
    index: Arc<dyn DocumentIndex>,
    factory: AdapterFactory,
    pool: WorkerPool,
    events: Mutex<UnboundedReceiver<TaskEvent>>,
    tracker: TaskTracker,
}

impl IndexService {
    /// Opens the configured index, seeds the configured endpoints, and
    /// starts an empty worker pool on the current runtime.
    pub async fn open(config: Config, factory: AdapterFactory) -> Result<Self> {
        let (backend, index) = open_index(&config.index).await?;

        for endpoint in &config.endpoints {
            if index.find_endpoint(&endpoint.name).await?.is_none() {
                index.add_endpoint(&endpoint.to_endpoint()).await?;
                info!(endpoint = %endpoint.name, protocol = %endpoint.protocol, "endpoint seeded");
            }
        }

        let context = WorkerContext {
            index: index.clone(),
            factory: factory.clone(),
        };
        let (pool, events) = WorkerPool::new(config.scan.max_workers, context, Handle::current());

        Ok(Self {
            config,
            backend,
            index,
            factory,
            pool,
            events: Mutex::new(events),
            tracker: TaskTracker::new(),
        })
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn index(&self) -> &Arc<dyn DocumentIndex> {
        &self.index
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn get_documents(
        &self,
        cursor: &Cursor,
        filter: Option<&str>,
        language: Option<&str>,
    ) -> Result<Page<DocumentDescriptor>, IndexError> {
        self.index.query(cursor, filter, language).await
    }

    /// Like [`get_documents`](Self::get_documents) with a base64url-encoded
    /// filter, as it arrives over the wire. An undecodable filter matches
    /// nothing.
    pub async fn get_documents_encoded(
        &self,
        cursor: &Cursor,
        filter: Option<&str>,
        language: Option<&str>,
    ) -> Result<Page<DocumentDescriptor>, IndexError> {
        let decoded = match filter {
            None => None,
            Some(encoded) => match decode_filter(encoded) {
                Some(filter) => Some(filter),
                None => {
                    warn!(filter = encoded, "filter is not valid base64url text");
                    return Ok(Page::empty());
                }
            },
        };
        self.get_documents(cursor, decoded.as_deref(), language).await
    }

    /// Returns the descriptor and, when the endpoint can deliver it, the
    /// live content of a document.
    pub async fn get_document(
        &self,
        endpoint: Option<&str>,
        id: &str,
    ) -> Result<(DocumentDescriptor, Option<Environment>), ServiceError> {
        let descriptor = self
            .index
            .find(endpoint, id)
            .await?
            .ok_or_else(|| IndexError::DocumentNotFound(id.to_string()))?;

        let content = match self.fetch_content(&descriptor).await {
            Ok(content) => content,
            Err(e) => {
                warn!(endpoint = %descriptor.endpoint, document = %descriptor.id, error = %e, "failed to fetch document content");
                None
            }
        };
        Ok((descriptor, content))
    }

    async fn fetch_content(&self, descriptor: &DocumentDescriptor) -> Result<Option<Environment>> {
        let Some(endpoint) = self.index.find_endpoint(&descriptor.endpoint).await? else {
            return Ok(None);
        };
        let mut adapter = self.factory.create(&endpoint)?;
        adapter.open().await?;
        let live = adapter.fetch_document(&descriptor.address).await;
        if let Err(e) = adapter.close().await {
            debug!(endpoint = %endpoint.name, error = %e, "failed to close adapter");
        }
        Ok(live?.content)
    }

    /// Registers an endpoint after checking that an adapter can be built
    /// for it and that it is reachable.
    pub async fn add_endpoint(&self, name: &str, spec: EndpointSpec) -> Result<Endpoint, ServiceError> {
        let endpoint = Endpoint {
            name: name.to_string(),
            url: spec.url,
            protocol: spec.protocol,
            version: spec.version,
        };
        let mut adapter = self.factory.create(&endpoint)?;
        adapter
            .test_connectivity()
            .await
            .map_err(|source| ServiceError::Unreachable {
                name: name.to_string(),
                source,
            })?;
        self.index.add_endpoint(&endpoint).await?;
        info!(endpoint = name, protocol = %endpoint.protocol, "endpoint added");
        Ok(endpoint)
    }

    /// Cancels the endpoint's tasks, then removes it and its documents.
    pub async fn remove_endpoint(&self, name: &str) -> Result<(), ServiceError> {
        if self.index.find_endpoint(name).await?.is_none() {
            return Err(IndexError::EndpointNotFound(name.to_string()).into());
        }
        let cancelled = self.pool.cancel_owner(name);
        self.index.remove_endpoint(name).await?;
        self.tracker.reset(name);
        info!(endpoint = name, cancelled, "endpoint removed");
        Ok(())
    }

    pub async fn endpoints(&self) -> Result<Vec<Endpoint>, IndexError> {
        self.index.endpoints().await
    }

    fn submit(&self, endpoint: Endpoint, kind: TaskKind) -> TaskId {
        let task = ScanTask {
            id: self.tracker.next_task_id(),
            endpoint,
            kind,
            page_size: self.config.scan.page_size as u64,
            expiry_ms: i64::try_from(self.config.scan.expiry().as_millis()).unwrap_or(i64::MAX),
        };
        let id = task.id;
        debug!(task_id = id, endpoint = %task.endpoint.name, ?kind, "task submitted");
        self.pool.execute(task);
        id
    }

    async fn require_endpoint(&self, name: &str) -> Result<Endpoint, IndexError> {
        self.index
            .find_endpoint(name)
            .await?
            .ok_or_else(|| IndexError::EndpointNotFound(name.to_string()))
    }

    /// Submits a reconciliation of one endpoint.
    pub async fn scan_endpoint(&self, name: &str) -> Result<TaskId, IndexError> {
        let endpoint = self.require_endpoint(name).await?;
        Ok(self.submit(endpoint, TaskKind::Reconcile))
    }

    /// Submits a connectivity check of one endpoint.
    pub async fn check_endpoint(&self, name: &str) -> Result<TaskId, IndexError> {
        let endpoint = self.require_endpoint(name).await?;
        Ok(self.submit(endpoint, TaskKind::Connectivity))
    }

    /// Submits a reconciliation of every registered endpoint.
    pub async fn scan_all(&self) -> Result<Vec<TaskId>, IndexError> {
        Ok(self
            .index
            .endpoints()
            .await?
            .into_iter()
            .map(|endpoint| self.submit(endpoint, TaskKind::Reconcile))
            .collect())
    }

    /// Waits for the next task event. `None` once the pool is gone.
    pub async fn next_event(&self) -> Option<TaskEvent> {
        self.events.lock().await.recv().await
    }

    /// Writes one task event into the index and the statistics.
    ///
    /// Results for endpoints removed in the meantime are skipped.
    pub async fn apply(&self, event: &TaskEvent) -> Result<(), IndexError> {
        match (&event.kind, &event.payload) {
            (
                TaskEventKind::Added | TaskEventKind::Changed | TaskEventKind::Update,
                TaskPayload::Document { descriptor, rows },
            ) => match self.index.upsert(descriptor, rows.as_deref()).await {
                Err(IndexError::EndpointNotFound(endpoint)) => {
                    debug!(endpoint = %endpoint, document = %descriptor.id, "skipping result of removed endpoint");
                    Ok(())
                }
                other => other,
            },
            (TaskEventKind::Removed, TaskPayload::Document { descriptor, .. }) => {
                self.index
                    .remove(Some(&descriptor.endpoint), Some(&descriptor.id))
                    .await?;
                Ok(())
            }
            (TaskEventKind::End, payload) => {
                if let Some(statistics) = &event.statistics {
                    self.tracker.record(&event.endpoint, statistics);
                }
                if let TaskPayload::Messages(messages) = payload {
                    for message in messages {
                        warn!(task_id = event.task_id, endpoint = %event.endpoint, message = %message, "scan reported an error");
                    }
                }
                Ok(())
            }
            (TaskEventKind::Fault, _) => {
                self.tracker.record_fault(&event.endpoint);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Applies events until every task in `tasks` has ended, calling
    /// `on_event` for each event. Returns the terminal events of `tasks`.
    pub async fn run_until_complete<F>(
        &self,
        tasks: &[TaskId],
        mut on_event: F,
    ) -> Result<Vec<TaskEvent>, IndexError>
    where
        F: FnMut(&TaskEvent),
    {
        let mut waiting: HashSet<TaskId> = tasks.iter().copied().collect();
        let mut terminal = Vec::with_capacity(tasks.len());

        while !waiting.is_empty() {
            let Some(event) = self.next_event().await else {
                break;
            };
            if let Err(e) = self.apply(&event).await {
                warn!(task_id = event.task_id, endpoint = %event.endpoint, error = %e, "failed to apply scan result");
                if !e.is_consistency() {
                    return Err(e);
                }
            }
            on_event(&event);
            if event.kind.is_terminal() && waiting.remove(&event.task_id) {
                terminal.push(event);
            }
        }
        Ok(terminal)
    }

    pub fn statistics(&self, name: &str) -> EndpointStatistics {
        self.tracker.statistics(name)
    }

    /// Scans every endpoint each `interval`, skipping endpoints whose
    /// previous scan is still queued or running, and applies events as
    /// they arrive. Returns when `shutdown` completes.
    pub async fn run_scheduler<S>(&self, interval: Duration, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let busy: HashSet<String> = self.pool.owners().into_iter().collect();
                    for endpoint in self.index.endpoints().await? {
                        if busy.contains(&endpoint.name) {
                            debug!(endpoint = %endpoint.name, "previous scan still pending, skipping");
                            continue;
                        }
                        self.submit(endpoint, TaskKind::Reconcile);
                    }
                }
                event = self.next_event() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.apply(&event).await {
                        warn!(task_id = event.task_id, endpoint = %event.endpoint, error = %e, "failed to apply scan result");
                    }
                }
            }
        }
        Ok(())
    }

    /// Stops the worker pool; queued tasks are cancelled.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

fn decode_filter(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim().trim_end_matches('='))
        .ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_filter() {
        let encoded = URL_SAFE_NO_PAD.encode("#prop:MaxRotationSpeed > 10");
        assert_eq!(
            decode_filter(&encoded).as_deref(),
            Some("#prop:MaxRotationSpeed > 10")
        );
        assert_eq!(decode_filter(&format!("{}==", URL_SAFE_NO_PAD.encode("ab"))).as_deref(), Some("ab"));
        assert_eq!(decode_filter("***"), None);
    }
}
