//! Bounded pool of isolated scan units.
//!
//! Each unit is a dedicated OS thread that runs one [`ScanTask`] at a time
//! on the coordinating runtime's [`Handle`]. Coordinator and unit share no
//! mutable state: requests and messages cross as encoded envelopes
//! ([`crate::protocol`]). A per-unit forwarder task decodes the unit's
//! messages and publishes them as [`TaskEvent`]s.
//!
//! A unit that panics, or whose envelopes cannot be decoded, is evicted.
//! Its running task ends with [`TaskEventKind::Fault`] and the pool carries
//! on with its remaining units.
//!
//! Units block their thread while a task runs, so the pool expects a
//! multi-threaded runtime.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

use aasx_index_core::models::{DocumentDescriptor, ElementRow};
use aasx_index_core::store::DocumentIndex;

use crate::adapters::AdapterFactory;
use crate::protocol::{
    decode, encode, ResultKind, ScanStatistics, ScanTask, TaskId, WorkerMessage, WorkerRequest,
};
use crate::scan::run_task;

/// Shared collaborators handed to every unit.
#[derive(Clone)]
pub struct WorkerContext {
    pub index: Arc<dyn DocumentIndex>,
    pub factory: AdapterFactory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEventKind {
    Added,
    Changed,
    Removed,
    Update,
    NextPage,
    End,
    /// The unit running the task failed; terminal.
    Fault,
    /// The task was cancelled by owner; terminal.
    Cancelled,
}

impl TaskEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEventKind::End | TaskEventKind::Fault | TaskEventKind::Cancelled
        )
    }
}

impl From<ResultKind> for TaskEventKind {
    fn from(kind: ResultKind) -> Self {
        match kind {
            ResultKind::Added => TaskEventKind::Added,
            ResultKind::Changed => TaskEventKind::Changed,
            ResultKind::Update => TaskEventKind::Update,
            ResultKind::Removed => TaskEventKind::Removed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    None,
    Document {
        descriptor: DocumentDescriptor,
        rows: Option<Vec<ElementRow>>,
    },
    Cursor(String),
    Messages(Vec<String>),
    Fault(String),
}

/// Outcome of a task as seen by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub endpoint: String,
    pub kind: TaskEventKind,
    pub payload: TaskPayload,
    /// Present on `End` and on `Cancelled` tasks that ran to completion.
    pub statistics: Option<ScanStatistics>,
}

impl TaskEvent {
    fn terminal(task: &ScanTask, kind: TaskEventKind, payload: TaskPayload) -> Self {
        Self {
            task_id: task.id,
            endpoint: task.endpoint.name.clone(),
            kind,
            payload,
            statistics: None,
        }
    }
}

struct Running {
    task: ScanTask,
    cancelled: bool,
}

struct Unit {
    id: usize,
    requests: std_mpsc::Sender<Vec<u8>>,
    running: Option<Running>,
}

#[derive(Default)]
struct PoolState {
    units: Vec<Unit>,
    queue: VecDeque<ScanTask>,
    next_unit: usize,
    peak_units: usize,
    closed: bool,
}

struct PoolInner {
    max_units: usize,
    context: WorkerContext,
    handle: Handle,
    events: UnboundedSender<TaskEvent>,
    state: Mutex<PoolState>,
}

/// Bounded worker pool; see the module docs.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Creates an empty pool. Units are spawned on demand up to
    /// `max_units`. Task events are delivered on the returned receiver.
    pub fn new(
        max_units: usize,
        context: WorkerContext,
        handle: Handle,
    ) -> (Self, UnboundedReceiver<TaskEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(PoolInner {
            max_units: max_units.max(1),
            context,
            handle,
            events,
            state: Mutex::new(PoolState::default()),
        });
        (Self { inner }, receiver)
    }

    /// Runs `task` on an idle unit, on a new unit while below the bound,
    /// or queues it.
    pub fn execute(&self, task: ScanTask) {
        let mut state = self.inner.state.lock().unwrap();
        if state.closed {
            warn!(task_id = task.id, "worker pool is shut down, dropping task");
            self.inner.publish(TaskEvent::terminal(
                &task,
                TaskEventKind::Cancelled,
                TaskPayload::None,
            ));
            return;
        }
        state.queue.push_back(task);
        self.inner.dispatch(&mut state);
    }

    /// Cancels all tasks of `owner`: queued tasks are dropped, running
    /// tasks finish but their results are discarded. Returns the number
    /// of tasks affected.
    pub fn cancel_owner(&self, owner: &str) -> usize {
        let mut state = self.inner.state.lock().unwrap();
        let mut count = 0;

        let (dropped, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut state.queue)
            .into_iter()
            .partition(|t| t.owner() == owner);
        state.queue = kept;
        for task in dropped {
            count += 1;
            self.inner.publish(TaskEvent::terminal(
                &task,
                TaskEventKind::Cancelled,
                TaskPayload::None,
            ));
        }

        for unit in &mut state.units {
            if let Some(running) = unit.running.as_mut() {
                if running.task.owner() == owner && !running.cancelled {
                    running.cancelled = true;
                    count += 1;
                }
            }
        }
        debug!(owner, count, "cancelled tasks");
        count
    }

    pub fn max_units(&self) -> usize {
        self.inner.max_units
    }

    pub fn unit_count(&self) -> usize {
        self.inner.state.lock().unwrap().units.len()
    }

    /// Highest number of units alive at the same time.
    pub fn peak_units(&self) -> usize {
        self.inner.state.lock().unwrap().peak_units
    }

    pub fn idle_count(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.units.iter().filter(|u| u.running.is_none()).count()
    }

    pub fn queued(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    /// Owners of queued and running tasks, running first.
    pub fn owners(&self) -> Vec<String> {
        let state = self.inner.state.lock().unwrap();
        state
            .units
            .iter()
            .filter_map(|u| u.running.as_ref())
            .filter(|r| !r.cancelled)
            .map(|r| r.task.owner().to_string())
            .chain(state.queue.iter().map(|t| t.owner().to_string()))
            .collect()
    }

    /// Stops accepting work. Queued and running tasks end with
    /// `Cancelled`; units exit after their current task, whose messages
    /// are no longer delivered.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;
        let running = std::mem::take(&mut state.units)
            .into_iter()
            .filter_map(|u| u.running)
            .map(|r| r.task);
        for task in running.chain(std::mem::take(&mut state.queue)) {
            self.inner.publish(TaskEvent::terminal(
                &task,
                TaskEventKind::Cancelled,
                TaskPayload::None,
            ));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl PoolInner {
    fn publish(&self, event: TaskEvent) {
        // The receiver may be gone during shutdown.
        let _ = self.events.send(event);
    }

    /// Assigns queued tasks to idle units, spawning units while below the
    /// bound. Keeps the queue in FIFO order.
    fn dispatch(self: &Arc<Self>, state: &mut PoolState) {
        while let Some(task) = state.queue.pop_front() {
            let slot = match state.units.iter().position(|u| u.running.is_none()) {
                Some(slot) => slot,
                None if state.units.len() < self.max_units => match self.spawn_unit(state) {
                    Ok(slot) => slot,
                    Err(e) => {
                        error!(task_id = task.id, endpoint = %task.endpoint.name, error = %e, "failed to spawn worker unit");
                        self.publish(TaskEvent::terminal(
                            &task,
                            TaskEventKind::Fault,
                            TaskPayload::Fault(e.to_string()),
                        ));
                        continue;
                    }
                },
                None => {
                    state.queue.push_front(task);
                    return;
                }
            };

            let request = match encode(&WorkerRequest::Run(task.clone())) {
                Ok(request) => request,
                Err(e) => {
                    error!(task_id = task.id, error = %e, "failed to encode task");
                    self.publish(TaskEvent::terminal(
                        &task,
                        TaskEventKind::Fault,
                        TaskPayload::Fault(e.to_string()),
                    ));
                    continue;
                }
            };

            let unit = &mut state.units[slot];
            if unit.requests.send(request).is_err() {
                warn!(unit = unit.id, "worker unit is gone, evicting");
                state.units.remove(slot);
                state.queue.push_front(task);
                continue;
            }
            debug!(unit = unit.id, task_id = task.id, endpoint = %task.endpoint.name, "task assigned");
            unit.running = Some(Running {
                task,
                cancelled: false,
            });
        }
    }

    fn spawn_unit(self: &Arc<Self>, state: &mut PoolState) -> std::io::Result<usize> {
        let id = state.next_unit;
        state.next_unit += 1;

        let (requests, request_rx) = std_mpsc::channel::<Vec<u8>>();
        let (message_tx, message_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let context = self.context.clone();
        let handle = self.handle.clone();

        thread::Builder::new()
            .name(format!("aasx-unit-{}", id))
            .spawn(move || unit_main(request_rx, message_tx, context, handle))?;

        self.handle
            .spawn(forward(Arc::downgrade(self), id, message_rx));

        state.units.push(Unit {
            id,
            requests,
            running: None,
        });
        state.peak_units = state.peak_units.max(state.units.len());
        debug!(unit = id, units = state.units.len(), "worker unit spawned");
        Ok(state.units.len() - 1)
    }

    fn on_message(self: &Arc<Self>, unit_id: usize, message: WorkerMessage) {
        let mut state = self.state.lock().unwrap();
        let Some(slot) = state.units.iter().position(|u| u.id == unit_id) else {
            return;
        };
        let Some(running) = state.units[slot].running.as_ref() else {
            warn!(unit = unit_id, "message from idle worker unit ignored");
            return;
        };
        let task = &running.task;
        let cancelled = running.cancelled;

        match message {
            WorkerMessage::Result(result) => {
                if !cancelled {
                    self.publish(TaskEvent {
                        task_id: task.id,
                        endpoint: task.endpoint.name.clone(),
                        kind: result.kind.into(),
                        payload: TaskPayload::Document {
                            descriptor: result.descriptor,
                            rows: result.rows,
                        },
                        statistics: None,
                    });
                }
            }
            WorkerMessage::NextPage { cursor } => {
                if !cancelled {
                    self.publish(TaskEvent {
                        task_id: task.id,
                        endpoint: task.endpoint.name.clone(),
                        kind: TaskEventKind::NextPage,
                        payload: TaskPayload::Cursor(cursor),
                        statistics: None,
                    });
                }
            }
            WorkerMessage::End {
                statistics,
                messages,
            } => {
                let kind = if cancelled {
                    TaskEventKind::Cancelled
                } else {
                    TaskEventKind::End
                };
                self.publish(TaskEvent {
                    task_id: task.id,
                    endpoint: task.endpoint.name.clone(),
                    kind,
                    payload: TaskPayload::Messages(messages),
                    statistics: Some(statistics),
                });
                state.units[slot].running = None;
                self.dispatch(&mut state);
            }
        }
    }

    fn on_fault(self: &Arc<Self>, unit_id: usize, reason: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(slot) = state.units.iter().position(|u| u.id == unit_id) else {
            return;
        };
        let unit = state.units.remove(slot);
        match unit.running {
            Some(running) => {
                error!(
                    unit = unit_id,
                    task_id = running.task.id,
                    endpoint = %running.task.endpoint.name,
                    reason,
                    "worker fault, evicting unit"
                );
                let kind = if running.cancelled {
                    TaskEventKind::Cancelled
                } else {
                    TaskEventKind::Fault
                };
                self.publish(TaskEvent::terminal(
                    &running.task,
                    kind,
                    TaskPayload::Fault(reason.to_string()),
                ));
            }
            None => warn!(unit = unit_id, reason, "idle worker unit terminated"),
        }
        if !state.closed {
            self.dispatch(&mut state);
        }
    }
}

/// Decodes one unit's envelopes until its thread exits.
async fn forward(pool: Weak<PoolInner>, unit_id: usize, mut messages: UnboundedReceiver<Vec<u8>>) {
    while let Some(envelope) = messages.recv().await {
        let Some(inner) = pool.upgrade() else {
            return;
        };
        match decode::<WorkerMessage>(&envelope) {
            Ok(message) => inner.on_message(unit_id, message),
            Err(e) => {
                inner.on_fault(unit_id, &format!("malformed message: {}", e));
                return;
            }
        }
    }
    if let Some(inner) = pool.upgrade() {
        inner.on_fault(unit_id, "worker unit terminated");
    }
}

fn unit_main(
    requests: std_mpsc::Receiver<Vec<u8>>,
    messages: UnboundedSender<Vec<u8>>,
    context: WorkerContext,
    handle: Handle,
) {
    while let Ok(envelope) = requests.recv() {
        let task = match decode::<WorkerRequest>(&envelope) {
            Ok(WorkerRequest::Run(task)) => task,
            Err(e) => {
                error!(error = %e, "malformed request, stopping unit");
                return;
            }
        };

        let mut broken = false;
        handle.block_on(run_task(
            &task,
            context.index.as_ref(),
            &context.factory,
            |message| {
                if broken {
                    return;
                }
                match encode(&message) {
                    Ok(envelope) => broken = messages.send(envelope).is_err(),
                    Err(e) => {
                        error!(task_id = task.id, error = %e, "failed to encode message");
                        broken = true;
                    }
                }
            },
        ));
        if broken {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter_opc::OpcClient;
    use crate::protocol::TaskKind;
    use aasx_index_core::content::Environment;
    use aasx_index_core::error::AdapterError;
    use aasx_index_core::models::Endpoint;
    use aasx_index_core::store::memory::MemoryIndex;

    fn context() -> WorkerContext {
        WorkerContext {
            index: Arc::new(MemoryIndex::new()),
            factory: AdapterFactory::new(),
        }
    }

    fn task(id: TaskId, owner: &str, url: &str) -> ScanTask {
        ScanTask {
            id,
            endpoint: Endpoint {
                name: owner.into(),
                url: url.into(),
                protocol: "directory".into(),
                version: None,
            },
            kind: TaskKind::Connectivity,
            page_size: 10,
            expiry_ms: 0,
        }
    }

    async fn terminal_events(
        events: &mut UnboundedReceiver<TaskEvent>,
        n: usize,
    ) -> Vec<TaskEvent> {
        let mut out = Vec::new();
        while out.len() < n {
            let event = events.recv().await.unwrap();
            if event.kind.is_terminal() {
                out.push(event);
            }
        }
        out
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bound_and_each_task_ends_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("file://{}", dir.path().display());
        let (pool, mut events) = WorkerPool::new(2, context(), Handle::current());

        for id in 1..=9 {
            pool.execute(task(id, &format!("e{}", id % 3), &url));
        }
        let mut ended: Vec<TaskId> = terminal_events(&mut events, 9)
            .await
            .into_iter()
            .inspect(|e| assert_eq!(e.kind, TaskEventKind::End))
            .map(|e| e.task_id)
            .collect();
        ended.sort();
        assert_eq!(ended, (1..=9).collect::<Vec<_>>());
        assert!(pool.peak_units() <= 2);
        assert_eq!(pool.queued(), 0);
        assert_eq!(pool.idle_count(), pool.unit_count());
    }

    /// OPC client whose `connect` waits until the gate is opened.
    struct GatedClient {
        gate: tokio::sync::Semaphore,
    }

    #[async_trait::async_trait]
    impl OpcClient for GatedClient {
        async fn connect(&self, _url: &str) -> Result<(), AdapterError> {
            let _permit = self.gate.acquire().await.unwrap();
            Ok(())
        }

        async fn disconnect(&self, _url: &str) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn browse_shells(&self, _url: &str) -> Result<Vec<String>, AdapterError> {
            Ok(Vec::new())
        }

        async fn read_environment(&self, _url: &str, node: &str) -> Result<Environment, AdapterError> {
            Err(AdapterError::Document {
                id: node.into(),
                message: "not readable".into(),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_owner_drops_queued_and_discards_running() {
        let client = Arc::new(GatedClient {
            gate: tokio::sync::Semaphore::new(0),
        });
        let context = WorkerContext {
            index: Arc::new(MemoryIndex::new()),
            factory: AdapterFactory::new().with_opc_client(client.clone()),
        };
        let (pool, mut events) = WorkerPool::new(1, context, Handle::current());

        let mut blocked = task(1, "drop", "opc.tcp://plc:4840");
        blocked.endpoint.protocol = "opcua".into();
        pool.execute(blocked);
        pool.execute(task(2, "drop", "file:///nonexistent"));
        pool.execute(task(3, "keep", "file:///nonexistent"));
        assert_eq!(pool.queued(), 2);

        assert_eq!(pool.cancel_owner("drop"), 2);
        assert_eq!(pool.queued(), 1);
        assert_eq!(pool.owners(), vec!["keep".to_string()]);
        client.gate.add_permits(1);

        let events = terminal_events(&mut events, 3).await;
        let by_id = |id| events.iter().find(|e| e.task_id == id).unwrap().kind;
        assert_eq!(by_id(1), TaskEventKind::Cancelled);
        assert_eq!(by_id(2), TaskEventKind::Cancelled);
        assert_eq!(by_id(3), TaskEventKind::End);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_ends_running_and_queued_tasks_once() {
        let client = Arc::new(GatedClient {
            gate: tokio::sync::Semaphore::new(0),
        });
        let context = WorkerContext {
            index: Arc::new(MemoryIndex::new()),
            factory: AdapterFactory::new().with_opc_client(client.clone()),
        };
        let (pool, mut events) = WorkerPool::new(1, context, Handle::current());

        let mut blocked = task(1, "plc", "opc.tcp://plc:4840");
        blocked.endpoint.protocol = "opcua".into();
        pool.execute(blocked);
        pool.execute(task(2, "shelf", "file:///nonexistent"));
        assert_eq!(pool.queued(), 1);

        pool.shutdown();
        let mut ended: Vec<(TaskId, TaskEventKind)> = terminal_events(&mut events, 2)
            .await
            .into_iter()
            .map(|e| (e.task_id, e.kind))
            .collect();
        ended.sort_by_key(|(id, _)| *id);
        assert_eq!(
            ended,
            vec![(1, TaskEventKind::Cancelled), (2, TaskEventKind::Cancelled)]
        );

        client.gate.add_permits(1);
        let late = tokio::time::timeout(std::time::Duration::from_millis(200), events.recv()).await;
        assert!(late.is_err(), "no events after shutdown: {:?}", late);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_cancels_queue_and_rejects_work() {
        let (pool, mut events) = WorkerPool::new(1, context(), Handle::current());
        pool.shutdown();
        pool.execute(task(7, "late", "file:///nonexistent"));
        let event = events.recv().await.unwrap();
        assert_eq!(event.task_id, 7);
        assert_eq!(event.kind, TaskEventKind::Cancelled);
        assert_eq!(pool.unit_count(), 0);
    }
}
