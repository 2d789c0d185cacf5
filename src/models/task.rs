use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A labeled work session. At most one task is open per tracker instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub label: String,
    /// Monotonic seconds at task start.
    pub started_at: f64,
    /// Monotonic seconds at task end. `None` while the task is open.
    pub ended_at: Option<f64>,
    /// True when the task was closed implicitly by tracker shutdown rather
    /// than an explicit stop.
    pub closed_by_shutdown: bool,
}

impl Task {
    pub fn open(label: impl Into<String>, started_at: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            started_at,
            ended_at: None,
            closed_by_shutdown: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}
