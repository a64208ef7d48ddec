//! Scan progress reporting.
//!
//! Reports what `aasx-index scan` does while it runs: every document
//! classified by a task, listing pages, and the final counters of each
//! endpoint. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

use crate::pool::{TaskEvent, TaskEventKind, TaskPayload};

/// Reports scan progress. Implementations write to stderr (human or JSON).
pub trait ScanProgressReporter: Send + Sync {
    fn report(&self, event: &TaskEvent);
}

fn kind_label(kind: TaskEventKind) -> &'static str {
    match kind {
        TaskEventKind::Added => "added",
        TaskEventKind::Changed => "changed",
        TaskEventKind::Removed => "removed",
        TaskEventKind::Update => "updated",
        TaskEventKind::NextPage => "page",
        TaskEventKind::End => "done",
        TaskEventKind::Fault => "fault",
        TaskEventKind::Cancelled => "cancelled",
    }
}

/// Human-friendly line: "scan samples  added  urn:example:aas:1".
pub fn human_line(event: &TaskEvent) -> String {
    let label = kind_label(event.kind);
    let detail = match (&event.payload, &event.statistics) {
        (TaskPayload::Document { descriptor, .. }, _) => descriptor.id.clone(),
        (TaskPayload::Cursor(cursor), _) => cursor.clone(),
        (TaskPayload::Fault(reason), _) => reason.clone(),
        (_, Some(stats)) => format!(
            "{} added, {} changed, {} updated, {} removed, {} errors",
            format_number(stats.added),
            format_number(stats.changed),
            format_number(stats.updated),
            format_number(stats.removed),
            format_number(stats.errors)
        ),
        _ => String::new(),
    };
    if detail.is_empty() {
        format!("scan {}  {}", event.endpoint, label)
    } else {
        format!("scan {}  {}  {}", event.endpoint, label, detail)
    }
}

/// Machine-readable form of one event.
pub fn json_event(event: &TaskEvent) -> serde_json::Value {
    let mut obj = serde_json::json!({
        "event": kind_label(event.kind),
        "task": event.task_id,
        "endpoint": event.endpoint,
    });
    match &event.payload {
        TaskPayload::Document { descriptor, .. } => {
            obj["id"] = serde_json::json!(descriptor.id);
            obj["address"] = serde_json::json!(descriptor.address);
        }
        TaskPayload::Cursor(cursor) => obj["cursor"] = serde_json::json!(cursor),
        TaskPayload::Messages(messages) if !messages.is_empty() => {
            obj["messages"] = serde_json::json!(messages)
        }
        TaskPayload::Fault(reason) => obj["reason"] = serde_json::json!(reason),
        _ => {}
    }
    if let Some(stats) = &event.statistics {
        obj["statistics"] = serde_json::json!({
            "added": stats.added,
            "changed": stats.changed,
            "updated": stats.updated,
            "removed": stats.removed,
            "errors": stats.errors,
        });
    }
    obj
}

pub struct StderrProgress;

impl ScanProgressReporter for StderrProgress {
    fn report(&self, event: &TaskEvent) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", human_line(event));
        let _ = stderr.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl ScanProgressReporter for JsonProgress {
    fn report(&self, event: &TaskEvent) {
        if let Ok(line) = serde_json::to_string(&json_event(event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ScanProgressReporter for NoProgress {
    fn report(&self, _event: &TaskEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ScanProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ScanStatistics;

    fn end_event() -> TaskEvent {
        TaskEvent {
            task_id: 3,
            endpoint: "samples".into(),
            kind: TaskEventKind::End,
            payload: TaskPayload::Messages(vec!["a.json: corrupt".into()]),
            statistics: Some(ScanStatistics {
                added: 1234,
                changed: 0,
                updated: 2,
                removed: 1,
                errors: 1,
            }),
        }
    }

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn human_line_summarizes_end() {
        assert_eq!(
            human_line(&end_event()),
            "scan samples  done  1,234 added, 0 changed, 2 updated, 1 removed, 1 errors"
        );
        let cancelled = TaskEvent {
            kind: TaskEventKind::Cancelled,
            payload: TaskPayload::None,
            statistics: None,
            ..end_event()
        };
        assert_eq!(human_line(&cancelled), "scan samples  cancelled");
    }

    #[test]
    fn json_event_fields() {
        let obj = json_event(&end_event());
        assert_eq!(obj["event"], "done");
        assert_eq!(obj["task"], 3);
        assert_eq!(obj["statistics"]["added"], 1234);
        assert_eq!(obj["messages"][0], "a.json: corrupt");
    }
}
