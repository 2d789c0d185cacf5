use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Event, EventKind, MetricsSnapshot, ResourceUsage, Task};

/// One persisted line. Event records carry `eventType`; snapshot records
/// carry `metricsType` with the full snapshot as payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Monotonic seconds, same domain as event timestamps.
    pub timestamp: f64,
    /// Wall-clock time the record was created, for humans reading the log.
    pub recorded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_type: Option<String>,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_usage: Option<f64>,
}

fn event_type_name(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::Keyboard { .. } => "keyboard",
        EventKind::Mouse { .. } => "mouse",
        EventKind::WindowFocus { .. } => "windowFocus",
        EventKind::TaskStart { .. } => "taskStart",
        EventKind::TaskEnd { .. } => "taskEnd",
    }
}

impl LogRecord {
    pub fn from_event(event: &Event) -> Self {
        Self {
            timestamp: event.timestamp,
            recorded_at: Utc::now(),
            event_type: Some(event_type_name(&event.kind).to_string()),
            metrics_type: None,
            payload: serde_json::to_value(event).unwrap_or(Value::Null),
            window_title: event.window_title.clone(),
            application: event.application.clone(),
            cpu_usage: event.resources.cpu_pct,
            memory_usage: event.resources.mem_pct,
            gpu_usage: event.resources.gpu_pct,
        }
    }

    pub fn from_snapshot(snapshot: &MetricsSnapshot, resources: ResourceUsage) -> Self {
        Self {
            timestamp: snapshot.window_end,
            recorded_at: Utc::now(),
            event_type: None,
            metrics_type: Some("metricsSnapshot".to_string()),
            payload: serde_json::to_value(snapshot).unwrap_or(Value::Null),
            window_title: None,
            application: None,
            cpu_usage: resources.cpu_pct,
            memory_usage: resources.mem_pct,
            gpu_usage: resources.gpu_pct,
        }
    }

    /// Record for a task closed at shutdown; `closedByShutdown` travels in
    /// the task payload.
    pub fn from_task_close(task: &Task, resources: ResourceUsage) -> Self {
        Self {
            timestamp: task.ended_at.unwrap_or(task.started_at),
            recorded_at: Utc::now(),
            event_type: Some("taskEnd".to_string()),
            metrics_type: None,
            payload: serde_json::to_value(task).unwrap_or(Value::Null),
            window_title: None,
            application: None,
            cpu_usage: resources.cpu_pct,
            memory_usage: resources.mem_pct,
            gpu_usage: resources.gpu_pct,
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.metrics_type.is_some()
    }

    pub fn is_event(&self) -> bool {
        self.event_type.is_some()
    }
}
