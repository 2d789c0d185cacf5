use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::capture::queue::EventQueue;
use crate::capture::resources::ResourceSampler;
use crate::clock::MonotonicClock;
use crate::error::CaptureError;
use crate::models::{Event, EventKind, InputClass};
use crate::tasks::TaskContext;

/// Shared sink capture sources deliver into. Stamps each raw notification
/// with its timestamp, the active task id, the cached resource snapshot,
/// and the currently focused window before enqueueing.
#[derive(Clone)]
pub struct EventSink {
    queue: EventQueue,
    sampler: ResourceSampler,
    tasks: TaskContext,
    clock: MonotonicClock,
    focus: Arc<Mutex<Option<(String, String)>>>,
}

impl EventSink {
    pub(crate) fn new(
        queue: EventQueue,
        sampler: ResourceSampler,
        tasks: TaskContext,
        clock: MonotonicClock,
    ) -> Self {
        Self {
            queue,
            sampler,
            tasks,
            clock,
            focus: Arc::new(Mutex::new(None)),
        }
    }

    /// Build and enqueue an event for a raw notification. Returns `true` if
    /// the queue dropped its oldest entry to make room.
    pub fn submit(&self, kind: EventKind) -> bool {
        // A focus change updates the shared focus state before stamping so
        // the event carries its own window, not the previous one.
        if let EventKind::WindowFocus { title, application } = &kind {
            let mut guard = match self.focus.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some((title.clone(), application.clone()));
        }

        let (window_title, application) = {
            let guard = match self.focus.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match guard.as_ref() {
                Some((title, app)) => (Some(title.clone()), Some(app.clone())),
                None => (None, None),
            }
        };

        let event = Event {
            timestamp: self.clock.now(),
            kind,
            window_title,
            application,
            task_id: self.tasks.active_id(),
            resources: self.sampler.current(),
        };

        self.queue.push(event)
    }
}

/// One capture source per input class. `install` may fail independently,
/// degrading only that class; `run` delivers events until cancelled.
pub trait EventSource: Send + 'static {
    fn class(&self) -> InputClass;

    /// Acquire the underlying hook. An error here means this input class is
    /// unavailable (permission denied, platform unsupported).
    fn install(&mut self) -> Result<(), CaptureError>;

    /// Consume the source and deliver events into the sink until the token
    /// is cancelled.
    fn run(self: Box<Self>, sink: EventSink, cancel: CancellationToken) -> JoinHandle<()>;
}

/// Metadata for the currently focused window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub title: String,
    pub application: String,
}

/// Platform seam for active-window metadata. Hosts link a real probe for
/// their platform; the default probe reports unsupported and the window
/// focus class degrades.
pub trait ActiveWindowProbe: Send + 'static {
    fn active_window(&mut self) -> Result<WindowInfo, CaptureError>;
}

/// Probe used when no platform backend is linked.
pub struct UnsupportedProbe;

impl ActiveWindowProbe for UnsupportedProbe {
    fn active_window(&mut self) -> Result<WindowInfo, CaptureError> {
        Err(CaptureError::Unsupported(
            "no active-window probe linked for this platform".into(),
        ))
    }
}

/// Polls an [`ActiveWindowProbe`] on an interval and emits a `WindowFocus`
/// event whenever the focused window changes.
pub struct WindowFocusSource<P: ActiveWindowProbe> {
    probe: Option<P>,
    poll_interval: Duration,
}

impl<P: ActiveWindowProbe> WindowFocusSource<P> {
    pub fn new(probe: P, poll_interval: Duration) -> Self {
        Self {
            probe: Some(probe),
            poll_interval,
        }
    }
}

impl<P: ActiveWindowProbe> EventSource for WindowFocusSource<P> {
    fn class(&self) -> InputClass {
        InputClass::WindowFocus
    }

    fn install(&mut self) -> Result<(), CaptureError> {
        // One probe up front proves the platform backend works before the
        // polling loop starts.
        let probe = self
            .probe
            .as_mut()
            .ok_or_else(|| CaptureError::InstallFailed("probe already consumed".into()))?;
        probe.active_window().map(|_| ())
    }

    fn run(mut self: Box<Self>, sink: EventSink, cancel: CancellationToken) -> JoinHandle<()> {
        let mut probe = match self.probe.take() {
            Some(probe) => probe,
            None => return tokio::spawn(async {}),
        };
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<WindowInfo> = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match probe.active_window() {
                            Ok(info) => {
                                if last.as_ref() != Some(&info) {
                                    sink.submit(EventKind::WindowFocus {
                                        title: info.title.clone(),
                                        application: info.application.clone(),
                                    });
                                    last = Some(info);
                                }
                            }
                            Err(err) => {
                                log::debug!("window probe failed: {err}");
                            }
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}

/// Handle used to feed a [`ScriptedSource`] from tests or demo hosts.
#[derive(Clone)]
pub struct ScriptedHandle {
    sender: mpsc::UnboundedSender<EventKind>,
}

impl ScriptedHandle {
    /// Queue a raw notification for delivery. Returns `false` once the
    /// source has shut down.
    pub fn emit(&self, kind: EventKind) -> bool {
        self.sender.send(kind).is_ok()
    }
}

/// Source that replays externally supplied notifications. Stands in for an
/// OS hook in tests and demos.
pub struct ScriptedSource {
    class: InputClass,
    receiver: Option<mpsc::UnboundedReceiver<EventKind>>,
}

impl ScriptedSource {
    pub fn pair(class: InputClass) -> (Self, ScriptedHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                class,
                receiver: Some(receiver),
            },
            ScriptedHandle { sender },
        )
    }
}

impl EventSource for ScriptedSource {
    fn class(&self) -> InputClass {
        self.class
    }

    fn install(&mut self) -> Result<(), CaptureError> {
        if self.receiver.is_some() {
            Ok(())
        } else {
            Err(CaptureError::InstallFailed(
                "scripted source already consumed".into(),
            ))
        }
    }

    fn run(mut self: Box<Self>, sink: EventSink, cancel: CancellationToken) -> JoinHandle<()> {
        let mut receiver = match self.receiver.take() {
            Some(receiver) => receiver,
            None => return tokio::spawn(async {}),
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_kind = receiver.recv() => {
                        match maybe_kind {
                            Some(kind) => {
                                sink.submit(kind);
                            }
                            None => break,
                        }
                    }
                    _ = cancel.cancelled() => {
                        // Flush anything already queued so no scripted event
                        // is lost at shutdown.
                        while let Ok(kind) = receiver.try_recv() {
                            sink.submit(kind);
                        }
                        break;
                    }
                }
            }
        })
    }
}
