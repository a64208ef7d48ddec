//! Worker-side body of a scan task.
//!
//! Drives [`reconcile`] for one endpoint and turns its events into
//! [`WorkerMessage`]s. The index is only read here; results are applied by
//! the coordinator.

use tracing::{info, warn};

use aasx_index_core::content::element_rows;
use aasx_index_core::models::{now_millis, DocumentDescriptor, ElementRow, LiveDocument};
use aasx_index_core::scanner::{reconcile, ScanEvent};
use aasx_index_core::store::DocumentIndex;

use crate::adapters::AdapterFactory;
use crate::protocol::{ResultKind, ScanResult, ScanStatistics, ScanTask, TaskKind, WorkerMessage};

/// Decides what a comparison of an indexed document with its live
/// counterpart means.
///
/// A differing checksum is a change. An unchanged document whose last
/// validation is older than `expiry_ms` is due for an update. Anything else
/// needs no action.
pub fn classify(
    reference: &DocumentDescriptor,
    live: &DocumentDescriptor,
    expiry_ms: i64,
    now: i64,
) -> Option<ResultKind> {
    if reference.checksum != live.checksum {
        Some(ResultKind::Changed)
    } else if now.saturating_sub(reference.timestamp) > expiry_ms {
        Some(ResultKind::Update)
    } else {
        None
    }
}

fn rows_of(live: &LiveDocument) -> Option<Vec<ElementRow>> {
    live.content
        .as_ref()
        .map(|content| element_rows(&live.descriptor.key(), content))
}

/// Runs `task` to completion, emitting every message including the
/// terminal [`WorkerMessage::End`].
///
/// Adapter and per-document failures become messages of the `End`; a
/// failing index or adapter construction ends the task early with the
/// reason in its messages.
pub async fn run_task<F>(
    task: &ScanTask,
    index: &dyn DocumentIndex,
    factory: &AdapterFactory,
    mut emit: F,
) where
    F: FnMut(WorkerMessage),
{
    let mut statistics = ScanStatistics::default();
    let mut messages = Vec::new();

    match factory.create(&task.endpoint) {
        Err(e) => {
            statistics.errors += 1;
            messages.push(e.to_string());
        }
        Ok(mut adapter) => match task.kind {
            TaskKind::Connectivity => {
                if let Err(e) = adapter.test_connectivity().await {
                    statistics.errors += 1;
                    messages.push(format!("{}: {}", task.endpoint.name, e));
                }
            }
            TaskKind::Reconcile => {
                let now = now_millis();
                let page_size = usize::try_from(task.page_size).unwrap_or(usize::MAX);
                let result = reconcile(
                    index,
                    adapter.as_mut(),
                    &task.endpoint.name,
                    page_size,
                    |event| {
                        let result = match event {
                            ScanEvent::Added(live) => Some(ScanResult {
                                kind: ResultKind::Added,
                                rows: rows_of(&live),
                                descriptor: live.descriptor,
                            }),
                            ScanEvent::Compare { reference, live } => {
                                classify(&reference, &live.descriptor, task.expiry_ms, now).map(
                                    |kind| ScanResult {
                                        kind,
                                        rows: rows_of(&live),
                                        descriptor: DocumentDescriptor {
                                            parent_id: reference.parent_id,
                                            ..live.descriptor
                                        },
                                    },
                                )
                            }
                            ScanEvent::Removed(reference) => Some(ScanResult {
                                kind: ResultKind::Removed,
                                descriptor: reference,
                                rows: None,
                            }),
                            ScanEvent::NextPage { cursor } => {
                                emit(WorkerMessage::NextPage { cursor });
                                None
                            }
                            ScanEvent::Error { id, message } => {
                                statistics.errors += 1;
                                messages.push(format!("{}: {}", id, message));
                                None
                            }
                        };
                        if let Some(result) = result {
                            statistics.record(result.kind);
                            emit(WorkerMessage::Result(result));
                        }
                    },
                )
                .await;

                match result {
                    Ok(summary) => info!(
                        task_id = task.id,
                        endpoint = %task.endpoint.name,
                        added = statistics.added,
                        changed = statistics.changed,
                        updated = statistics.updated,
                        removed = statistics.removed,
                        errors = statistics.errors,
                        reachable = summary.reachable,
                        "scan finished"
                    ),
                    Err(e) => {
                        warn!(task_id = task.id, endpoint = %task.endpoint.name, error = %e, "scan aborted");
                        statistics.errors += 1;
                        messages.push(e.to_string());
                    }
                }
            }
        },
    }

    emit(WorkerMessage::End {
        statistics,
        messages,
    });
}
