mod event;
mod snapshot;
mod task;

pub use event::{Event, EventKind, InputClass, KeyAction, MouseAction, ResourceUsage};
pub use snapshot::{CognitiveLoad, FlowState, MetricsSnapshot};
pub use task::Task;
