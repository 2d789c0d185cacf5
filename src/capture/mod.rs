mod queue;
mod resources;
mod source;

pub use queue::EventQueue;
pub use resources::ResourceSampler;
pub use source::{
    ActiveWindowProbe, EventSink, EventSource, ScriptedHandle, ScriptedSource, UnsupportedProbe,
    WindowFocusSource, WindowInfo,
};

use anyhow::{bail, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::InputClass;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Observable capture health: which input classes are delivering and which
/// degraded at install time.
#[derive(Debug, Clone, Default)]
pub struct CaptureStatus {
    pub active: Vec<InputClass>,
    pub degraded: Vec<(InputClass, String)>,
    pub queue_len: usize,
    pub queue_overflow: u64,
}

impl CaptureStatus {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// Owns the capture sources. Install failures degrade per class; a class
/// that cannot install is reported, not fatal, and the remaining classes
/// keep capturing.
pub struct CaptureController {
    queue: EventQueue,
    handles: Vec<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    active: Vec<InputClass>,
    degraded: Vec<(InputClass, String)>,
}

impl CaptureController {
    pub fn new(queue: EventQueue) -> Self {
        Self {
            queue,
            handles: Vec::new(),
            cancel_token: None,
            active: Vec::new(),
            degraded: Vec::new(),
        }
    }

    /// Install every source and start delivery. Sources whose install fails
    /// are recorded as degraded and skipped.
    pub fn start(&mut self, sources: Vec<Box<dyn EventSource>>, sink: EventSink) -> Result<()> {
        if self.cancel_token.is_some() {
            bail!("capture already active");
        }

        let cancel_token = CancellationToken::new();

        for mut src in sources {
            let class = src.class();
            match src.install() {
                Ok(()) => {
                    log_info!("capture installed for {}", class.as_str());
                    self.handles.push(src.run(sink.clone(), cancel_token.clone()));
                    self.active.push(class);
                }
                Err(err) => {
                    log_warn!("capture degraded, {} unavailable: {err}", class.as_str());
                    self.degraded.push((class, err.to_string()));
                }
            }
        }

        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Stop all sources. Idempotent; safe to call again after a stop.
    pub async fn stop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        for handle in self.handles.drain(..) {
            if let Err(err) = handle.await {
                log_warn!("capture source task failed to join: {err}");
            }
        }
        self.active.clear();
    }

    pub fn status(&self) -> CaptureStatus {
        CaptureStatus {
            active: self.active.clone(),
            degraded: self.degraded.clone(),
            queue_len: self.queue.len(),
            queue_overflow: self.queue.overflow_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::UnsupportedProbe;
    use crate::clock::MonotonicClock;
    use crate::models::{EventKind, KeyAction};
    use crate::tasks::TaskContext;
    use std::time::Duration;

    fn sink(queue: &EventQueue) -> EventSink {
        EventSink::new(
            queue.clone(),
            ResourceSampler::new(Duration::from_secs(60)),
            TaskContext::new(),
            MonotonicClock::new(),
        )
    }

    #[tokio::test]
    async fn unsupported_class_degrades_without_stopping_others() {
        let queue = EventQueue::new(16);
        let mut controller = CaptureController::new(queue.clone());

        let (scripted, handle) = ScriptedSource::pair(InputClass::Keyboard);
        let focus = WindowFocusSource::new(UnsupportedProbe, Duration::from_millis(10));

        controller
            .start(vec![Box::new(scripted), Box::new(focus)], sink(&queue))
            .unwrap();

        let status = controller.status();
        assert_eq!(status.active, vec![InputClass::Keyboard]);
        assert_eq!(status.degraded.len(), 1);
        assert_eq!(status.degraded[0].0, InputClass::WindowFocus);

        // The surviving class still delivers.
        handle.emit(EventKind::Keyboard {
            key: "a".into(),
            action: KeyAction::Press,
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len(), 1);

        controller.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let queue = EventQueue::new(16);
        let mut controller = CaptureController::new(queue.clone());
        let (scripted, _handle) = ScriptedSource::pair(InputClass::Mouse);

        controller
            .start(vec![Box::new(scripted)], sink(&queue))
            .unwrap();
        controller.stop().await;
        controller.stop().await;
        assert!(controller.status().active.is_empty());
    }
}
