use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::{
    CaptureController, CaptureStatus, EventQueue, EventSink, EventSource, ResourceSampler,
};
use crate::clock::MonotonicClock;
use crate::compute::{AccelDevice, BackendState, ComputeBackend};
use crate::config::TrackerConfig;
use crate::engine::MetricsEngine;
use crate::error::TrackerError;
use crate::models::{EventKind, Task};
use crate::persist::{LogRecord, PersistenceLog};
use crate::stream::{StreamPublisher, Subscriber};
use crate::tasks::TaskContext;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// Everything that exists only while the pipeline runs.
struct Running {
    capture: CaptureController,
    sink: EventSink,
    persist: PersistenceLog,
    sampler: ResourceSampler,
    engine_cancel: CancellationToken,
    engine_handle: JoinHandle<Result<(), TrackerError>>,
    state_rx: watch::Receiver<BackendState>,
}

/// Control surface over the whole pipeline: capture, metrics engine,
/// compute backend, task context, persistence, and streaming.
///
/// `start`/`stop` bracket a run; `start_task`/`stop_task` work only inside
/// one. `stop` is idempotent and always emits one final snapshot covering
/// the partial window since the last tick.
pub struct Tracker {
    config: TrackerConfig,
    log_dir: PathBuf,
    clock: MonotonicClock,
    tasks: TaskContext,
    publisher: StreamPublisher,
    pending_device: Option<Box<dyn AccelDevice>>,
    running: Option<Running>,
}

impl Tracker {
    pub fn new(config: TrackerConfig, log_dir: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        config.validate()?;
        let publisher = StreamPublisher::new(config.subscriber_buffer);
        Ok(Self {
            config,
            log_dir: log_dir.into(),
            clock: MonotonicClock::new(),
            tasks: TaskContext::new(),
            publisher,
            pending_device: None,
            running: None,
        })
    }

    /// Substitute an explicit compute device for the next `start`. Without
    /// one the backend probes the platform itself.
    pub fn install_device(&mut self, device: Box<dyn AccelDevice>) {
        self.pending_device = Some(device);
    }

    /// Bring the pipeline up: open the log (replaying anything staged by a
    /// crashed run), initialize the compute backend, install the capture
    /// sources, and spawn the engine loop.
    pub fn start(&mut self, sources: Vec<Box<dyn EventSource>>) -> Result<(), TrackerError> {
        if self.running.is_some() {
            return Err(TrackerError::AlreadyRunning);
        }

        let persist = PersistenceLog::open(&self.log_dir, &self.config)?;
        if persist.recovered_count() > 0 {
            log_info!(
                "replayed {} records staged by a previous run",
                persist.recovered_count()
            );
        }
        if persist.gap_reported() {
            log_warn!("previous run left an unreadable staged record; a gap was reported");
        }

        let queue = EventQueue::new(self.config.queue_capacity);
        let sampler = ResourceSampler::new(Duration::from_secs_f64(
            self.config.resource_refresh_seconds,
        ));
        let sink = EventSink::new(
            queue.clone(),
            sampler.clone(),
            self.tasks.clone(),
            self.clock,
        );

        let mut backend = ComputeBackend::new(&self.config);
        match self.pending_device.take() {
            Some(device) => backend.install_device(device),
            None => backend.initialize(),
        }

        let mut capture = CaptureController::new(queue.clone());
        capture
            .start(sources, sink.clone())
            .map_err(|err| TrackerError::InvalidConfig(err.to_string()))?;

        self.publisher.reopen();
        let (state_tx, state_rx) = watch::channel(backend.state());
        let engine = MetricsEngine::new(
            &self.config,
            queue,
            backend,
            self.tasks.clone(),
            persist.clone(),
            self.publisher.clone(),
            sampler.clone(),
            self.clock,
            state_tx,
        );
        let engine_cancel = CancellationToken::new();
        let engine_handle = tokio::spawn(engine.run(engine_cancel.clone()));

        self.running = Some(Running {
            capture,
            sink,
            persist,
            sampler,
            engine_cancel,
            engine_handle,
            state_rx,
        });
        log_info!("tracker started");
        Ok(())
    }

    /// Tear the pipeline down in capture-first order so the final window
    /// sees every event the sources delivered. Idempotent; a second call
    /// returns `Ok` without effect.
    pub async fn stop(&mut self) -> Result<(), TrackerError> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };

        // Sources stop and flush into the queue before the final window is
        // computed.
        running.capture.stop().await;

        if let Some(task) = self.tasks.close_for_shutdown(self.clock.now()) {
            log_info!("closing task \"{}\" at shutdown", task.label);
            let record = LogRecord::from_task_close(&task, running.sampler.current());
            if let Err(err) = running.persist.append(record) {
                log_warn!("could not archive shutdown-closed task: {err}");
            }
        }

        running.engine_cancel.cancel();
        let timeout = Duration::from_secs_f64(self.config.shutdown_timeout_seconds);
        let engine_result = match tokio::time::timeout(timeout, running.engine_handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(TrackerError::ComputeFatal(format!(
                "engine task failed: {join_err}"
            ))),
            Err(_) => {
                log_warn!("engine did not stop within {timeout:?}, abandoning it");
                Ok(())
            }
        };

        running.persist.shutdown();
        self.publisher.close();
        log_info!("tracker stopped");
        engine_result
    }

    /// Open a task. At most one can be open; a second start fails with
    /// [`TrackerError::AlreadyActiveTask`] and changes nothing.
    pub fn start_task(&self, label: &str) -> Result<Task, TrackerError> {
        let running = self.running.as_ref().ok_or(TrackerError::NotRunning)?;
        let task = self.tasks.start_task(label, self.clock.now())?;
        running.sink.submit(EventKind::TaskStart {
            label: task.label.clone(),
        });
        Ok(task)
    }

    /// Close the open task, if any. Stopping with no open task is a logged
    /// no-op.
    pub fn stop_task(&self) -> Result<Option<Task>, TrackerError> {
        let running = self.running.as_ref().ok_or(TrackerError::NotRunning)?;
        let closed = self.tasks.stop_task(self.clock.now());
        if let Some(task) = &closed {
            running.sink.submit(EventKind::TaskEnd {
                label: task.label.clone(),
            });
        }
        Ok(closed)
    }

    pub fn active_task(&self) -> Option<Task> {
        self.tasks.active()
    }

    /// Force buffered records to the main log and wait for the write.
    pub fn flush(&self) -> Result<(), TrackerError> {
        let running = self.running.as_ref().ok_or(TrackerError::NotRunning)?;
        running.persist.flush()?;
        Ok(())
    }

    /// True once persistence has exhausted its retries for this run.
    /// Capture and streaming continue regardless.
    pub fn persistence_failed(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| r.persist.is_failed())
            .unwrap_or(false)
    }

    /// Records accepted by the log this run, events and snapshots combined.
    pub fn archived_count(&self) -> u64 {
        self.running
            .as_ref()
            .map(|r| r.persist.appended_count())
            .unwrap_or(0)
    }

    /// Attach a snapshot subscriber. Valid while the tracker runs; after
    /// `stop` the stream ends and new subscribers see end-of-stream.
    pub fn subscribe(&self) -> Subscriber {
        self.publisher.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Capture health for the current run.
    pub fn capture_status(&self) -> Option<CaptureStatus> {
        self.running.as_ref().map(|r| r.capture.status())
    }

    /// Compute backend state as of the most recent engine tick.
    pub fn backend_state(&self) -> BackendState {
        match &self.running {
            Some(running) => *running.state_rx.borrow(),
            None => BackendState::Uninitialized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ScriptedSource;
    use crate::models::InputClass;
    use tempfile::tempdir;

    fn tracker(dir: &std::path::Path) -> Tracker {
        Tracker::new(TrackerConfig::default(), dir).unwrap()
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let dir = tempdir().unwrap();
        let mut tracker = tracker(dir.path());

        let (source, _handle) = ScriptedSource::pair(InputClass::Keyboard);
        tracker.start(vec![Box::new(source)]).unwrap();

        let err = tracker.start(Vec::new()).unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyRunning));
        tracker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn task_calls_require_a_running_tracker() {
        let dir = tempdir().unwrap();
        let tracker = tracker(dir.path());

        assert!(matches!(
            tracker.start_task("x").unwrap_err(),
            TrackerError::NotRunning
        ));
        assert!(matches!(
            tracker.stop_task().unwrap_err(),
            TrackerError::NotRunning
        ));
    }

    #[tokio::test]
    async fn second_task_start_fails_with_active_label() {
        let dir = tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        let (source, _handle) = ScriptedSource::pair(InputClass::Keyboard);
        tracker.start(vec![Box::new(source)]).unwrap();

        tracker.start_task("writing").unwrap();
        let err = tracker.start_task("reading").unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyActiveTask(label) if label == "writing"));
        tracker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_closes_open_task() {
        let dir = tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        let (source, _handle) = ScriptedSource::pair(InputClass::Keyboard);
        tracker.start(vec![Box::new(source)]).unwrap();

        tracker.start_task("writing").unwrap();
        tracker.stop().await.unwrap();
        tracker.stop().await.unwrap();

        assert!(!tracker.is_running());
        assert!(tracker.active_task().is_none());
    }

    #[tokio::test]
    async fn stop_emits_a_final_snapshot() {
        let dir = tempdir().unwrap();
        let mut tracker = tracker(dir.path());
        let (source, handle) = ScriptedSource::pair(InputClass::Keyboard);
        tracker.start(vec![Box::new(source)]).unwrap();
        let mut subscriber = tracker.subscribe();

        handle.emit(EventKind::Keyboard {
            key: "a".into(),
            action: crate::models::KeyAction::Press,
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tracker.stop().await.unwrap();

        // The partial window between start and stop produced a snapshot.
        let snapshot = subscriber.recv().await.unwrap();
        assert!(snapshot.window_end > snapshot.window_start);
        // And the stream then ends.
        while subscriber.recv().await.is_some() {}
    }
}
