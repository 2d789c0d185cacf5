use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input classes the capture layer can install hooks for. Each class can
/// fail independently and degrade without aborting the others.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum InputClass {
    Keyboard,
    Mouse,
    WindowFocus,
}

impl InputClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputClass::Keyboard => "keyboard",
            InputClass::Mouse => "mouse",
            InputClass::WindowFocus => "windowFocus",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum KeyAction {
    Press,
    Release,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MouseAction {
    Move,
    Click,
    Scroll,
}

/// Kind-specific payload. The shape is fixed per kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum EventKind {
    Keyboard {
        key: String,
        action: KeyAction,
    },
    Mouse {
        action: MouseAction,
        position: Option<(f64, f64)>,
        button: Option<String>,
    },
    WindowFocus {
        title: String,
        application: String,
    },
    TaskStart {
        label: String,
    },
    TaskEnd {
        label: String,
    },
}

impl EventKind {
    /// A correction keystroke is a backspace or delete press.
    pub fn is_correction(&self) -> bool {
        matches!(
            self,
            EventKind::Keyboard { key, action: KeyAction::Press }
                if key.eq_ignore_ascii_case("backspace") || key.eq_ignore_ascii_case("delete")
        )
    }

    pub fn is_keystroke(&self) -> bool {
        matches!(
            self,
            EventKind::Keyboard {
                action: KeyAction::Press,
                ..
            }
        )
    }
}

/// System resource usage sampled from the cached sampler at event time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub gpu_pct: Option<f64>,
}

/// A single captured event. Immutable once enqueued; consumed exactly once
/// by the metrics engine and archived by the persistence log afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Monotonic seconds since tracker start. Non-decreasing within a
    /// capture session.
    pub timestamp: f64,
    pub kind: EventKind,
    pub window_title: Option<String>,
    pub application: Option<String>,
    pub task_id: Option<Uuid>,
    pub resources: ResourceUsage,
}

impl Event {
    pub fn new(timestamp: f64, kind: EventKind) -> Self {
        Self {
            timestamp,
            kind,
            window_title: None,
            application: None,
            task_id: None,
            resources: ResourceUsage::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backspace_and_delete_presses_are_corrections() {
        let backspace = EventKind::Keyboard {
            key: "Backspace".into(),
            action: KeyAction::Press,
        };
        let delete = EventKind::Keyboard {
            key: "delete".into(),
            action: KeyAction::Press,
        };
        let release = EventKind::Keyboard {
            key: "backspace".into(),
            action: KeyAction::Release,
        };
        let letter = EventKind::Keyboard {
            key: "a".into(),
            action: KeyAction::Press,
        };

        assert!(backspace.is_correction());
        assert!(delete.is_correction());
        assert!(!release.is_correction());
        assert!(!letter.is_correction());
    }

    #[test]
    fn releases_are_not_keystrokes() {
        let release = EventKind::Keyboard {
            key: "a".into(),
            action: KeyAction::Release,
        };
        assert!(!release.is_keystroke());
    }
}
