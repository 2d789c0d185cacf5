use std::sync::{Arc, RwLock};

use log::warn;
use uuid::Uuid;

use crate::error::TrackerError;
use crate::models::Task;

/// Holds at most one open task. Written by the control surface, read by the
/// engine tick and capture stamping (single writer, multiple readers).
#[derive(Clone)]
pub struct TaskContext {
    inner: Arc<RwLock<TaskSlot>>,
}

#[derive(Default)]
struct TaskSlot {
    open: Option<Task>,
    /// Most recently closed task, kept so a snapshot whose window ends just
    /// after a task closes can still reference it.
    last_closed: Option<Task>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(TaskSlot::default())),
        }
    }

    /// Open a new task. Fails if one is already open; the caller must stop
    /// it explicitly first (no implicit stacking).
    pub fn start_task(&self, label: &str, now: f64) -> Result<Task, TrackerError> {
        let mut slot = self.write();
        if let Some(open) = &slot.open {
            return Err(TrackerError::AlreadyActiveTask(open.label.clone()));
        }
        let task = Task::open(label, now);
        slot.open = Some(task.clone());
        Ok(task)
    }

    /// Close the open task. A stop with no open task is a no-op with a
    /// warning, not an error.
    pub fn stop_task(&self, now: f64) -> Option<Task> {
        let mut slot = self.write();
        match slot.open.take() {
            Some(mut task) => {
                task.ended_at = Some(now);
                slot.last_closed = Some(task.clone());
                Some(task)
            }
            None => {
                warn!("stop_task called with no active task");
                None
            }
        }
    }

    /// Close any open task at shutdown, flagging it as closed by shutdown.
    pub fn close_for_shutdown(&self, now: f64) -> Option<Task> {
        let mut slot = self.write();
        match slot.open.take() {
            Some(mut task) => {
                task.ended_at = Some(now);
                task.closed_by_shutdown = true;
                slot.last_closed = Some(task.clone());
                Some(task)
            }
            None => None,
        }
    }

    /// Id of the open task, if any.
    pub fn active_id(&self) -> Option<Uuid> {
        self.read().open.as_ref().map(|task| task.id)
    }

    pub fn active(&self) -> Option<Task> {
        self.read().open.clone()
    }

    /// Task to attribute the window `[window_start, window_end)` to: the
    /// open task, or a task that closed inside the window.
    pub fn task_for_window(&self, window_start: f64, window_end: f64) -> Option<Uuid> {
        let slot = self.read();
        if let Some(open) = &slot.open {
            if open.started_at < window_end {
                return Some(open.id);
            }
        }
        slot.last_closed
            .as_ref()
            .filter(|task| task.ended_at.is_some_and(|ended| ended > window_start))
            .map(|task| task.id)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TaskSlot> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TaskSlot> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_start_fails_and_leaves_state_unchanged() {
        let tasks = TaskContext::new();
        let first = tasks.start_task("coding", 1.0).unwrap();

        let err = tasks.start_task("reading", 2.0).unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyActiveTask(label) if label == "coding"));

        // State unchanged: the original task is still the open one.
        assert_eq!(tasks.active_id(), Some(first.id));
    }

    #[test]
    fn stop_with_no_task_is_a_no_op() {
        let tasks = TaskContext::new();
        assert!(tasks.stop_task(1.0).is_none());
    }

    #[test]
    fn closed_task_attributes_only_overlapping_windows() {
        let tasks = TaskContext::new();
        let task = tasks.start_task("coding", 1.0).unwrap();
        tasks.stop_task(5.0);

        assert_eq!(tasks.active_id(), None);
        // Window [4, 6) still overlaps the task; [6, 8) does not.
        assert_eq!(tasks.task_for_window(4.0, 6.0), Some(task.id));
        assert_eq!(tasks.task_for_window(6.0, 8.0), None);
    }

    #[test]
    fn shutdown_close_sets_flag() {
        let tasks = TaskContext::new();
        tasks.start_task("coding", 1.0).unwrap();

        let closed = tasks.close_for_shutdown(9.0).unwrap();
        assert!(closed.closed_by_shutdown);
        assert_eq!(closed.ended_at, Some(9.0));
        assert!(tasks.active().is_none());
    }
}
