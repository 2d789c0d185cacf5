//! Desktop cognitive-load telemetry pipeline.
//!
//! Capture sources feed keyboard, mouse, and window-focus events into a
//! bounded queue; once per window the metrics engine drains it, reduces the
//! events on an accelerated or CPU compute path, and derives typing speed,
//! error rate, focus, cognitive-load bands, and flow state. Snapshots fan
//! out to subscribers and everything is archived to an append-only JSONL
//! log with crash recovery.
//!
//! [`Tracker`] is the entry point.

mod capture;
mod clock;
mod compute;
mod config;
mod engine;
mod error;
mod models;
mod persist;
mod stream;
mod tasks;
mod tracker;
mod utils;

pub use capture::{
    ActiveWindowProbe, CaptureStatus, EventSink, EventSource, ScriptedHandle, ScriptedSource,
    UnsupportedProbe, WindowFocusSource, WindowInfo,
};
pub use compute::{AccelDevice, BackendState, ResourceSample, WindowBatch, WindowReduction};
pub use config::{LoadBands, TrackerConfig};
pub use error::{CaptureError, ComputeError, PersistError, TrackerError};
pub use models::{
    CognitiveLoad, Event, EventKind, FlowState, InputClass, KeyAction, MetricsSnapshot,
    MouseAction, ResourceUsage, Task,
};
pub use stream::Subscriber;
pub use tracker::Tracker;
pub use utils::init_logging;
