//! Task id allocation and per-endpoint scan statistics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::protocol::{ScanStatistics, TaskId};

/// Accumulated statistics of one endpoint across scan cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EndpointStatistics {
    pub cycles: u64,
    pub added: u64,
    pub changed: u64,
    pub updated: u64,
    pub removed: u64,
    pub errors: u64,
}

pub struct TaskTracker {
    next: AtomicU64,
    statistics: Mutex<HashMap<String, EndpointStatistics>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            statistics: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_task_id(&self) -> TaskId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Folds the terminal statistics of one task into its endpoint's totals.
    pub fn record(&self, endpoint: &str, stats: &ScanStatistics) {
        let mut map = self.statistics.lock().unwrap();
        let entry = map.entry(endpoint.to_string()).or_default();
        entry.cycles += 1;
        entry.added += stats.added;
        entry.changed += stats.changed;
        entry.updated += stats.updated;
        entry.removed += stats.removed;
        entry.errors += stats.errors;
    }

    /// Counts a task that ended without statistics.
    pub fn record_fault(&self, endpoint: &str) {
        let mut map = self.statistics.lock().unwrap();
        let entry = map.entry(endpoint.to_string()).or_default();
        entry.cycles += 1;
        entry.errors += 1;
    }

    pub fn statistics(&self, endpoint: &str) -> EndpointStatistics {
        self.statistics
            .lock()
            .unwrap()
            .get(endpoint)
            .copied()
            .unwrap_or_default()
    }

    pub fn reset(&self, endpoint: &str) {
        self.statistics.lock().unwrap().remove(endpoint);
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}
