mod flow;
mod metrics;

pub use flow::FlowTracker;
pub use metrics::{cognitive_load, flow_quality, focus_score, resource_stability};

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::capture::{EventQueue, ResourceSampler};
use crate::clock::MonotonicClock;
use crate::compute::{BackendState, ComputeBackend, WindowBatch};
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::models::MetricsSnapshot;
use crate::persist::{LogRecord, PersistenceLog};
use crate::stream::StreamPublisher;
use crate::tasks::TaskContext;
use crate::{log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// Windowed metrics pipeline. Once per window it drains the capture queue,
/// reduces the drained events through the compute backend, derives the
/// higher-level scores, then archives and publishes the snapshot.
///
/// Windows are consecutive and non-overlapping: each tick covers
/// `[previous window end, now)`, so every captured event lands in exactly
/// one window.
pub struct MetricsEngine {
    queue: EventQueue,
    backend: ComputeBackend,
    tasks: TaskContext,
    persist: PersistenceLog,
    publisher: StreamPublisher,
    sampler: ResourceSampler,
    clock: MonotonicClock,
    flow: FlowTracker,
    window_size: f64,
    last_window_end: f64,
    state_tx: watch::Sender<BackendState>,
    persist_warned: bool,
}

impl MetricsEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &TrackerConfig,
        queue: EventQueue,
        backend: ComputeBackend,
        tasks: TaskContext,
        persist: PersistenceLog,
        publisher: StreamPublisher,
        sampler: ResourceSampler,
        clock: MonotonicClock,
        state_tx: watch::Sender<BackendState>,
    ) -> Self {
        let now = clock.now();
        Self {
            queue,
            backend,
            tasks,
            persist,
            publisher,
            sampler,
            clock,
            flow: FlowTracker::new(config.flow_quality_threshold),
            window_size: config.window_size_seconds,
            last_window_end: now,
            state_tx,
            persist_warned: false,
        }
    }

    /// Process the window ending at `now`. Returns `None` when the window
    /// would have zero width, which happens when a final flush lands on the
    /// same instant as the previous tick.
    pub fn run_tick(&mut self, now: f64) -> Result<Option<MetricsSnapshot>, TrackerError> {
        let window_start = self.last_window_end;
        if now <= window_start {
            return Ok(None);
        }

        let events = self.queue.drain_before(now);
        self.last_window_end = now;

        let batch = WindowBatch::extract(&events, window_start, now);
        let mut snapshot = if batch.is_empty() {
            let mut empty = MetricsSnapshot::empty(window_start, now);
            empty.flow_state = self.flow.observe(0.0, window_start, now);
            empty
        } else {
            let (reduction, degraded) = self
                .backend
                .reduce(&batch)
                .map_err(|err| TrackerError::ComputeFatal(err.to_string()))?;

            let focus = metrics::focus_score(&reduction, now - window_start);
            let load = metrics::cognitive_load(&reduction);
            let stability = metrics::resource_stability(&reduction);
            let quality = metrics::flow_quality(focus, reduction.error_rate, stability);
            let flow_state = self.flow.observe(quality, window_start, now);

            MetricsSnapshot {
                window_start,
                window_end: now,
                typing_speed_wpm: reduction.typing_speed_wpm,
                error_rate: reduction.error_rate,
                focus_score: focus,
                cognitive_load: load,
                flow_state,
                task_id: None,
                degraded,
            }
        };
        snapshot.task_id = self.tasks.task_for_window(window_start, now);

        self.state_tx.send_replace(self.backend.state());

        // Archive the raw events first so the log reads in causal order,
        // then the snapshot derived from them.
        for event in &events {
            self.persist_record(LogRecord::from_event(event));
        }
        self.persist_record(LogRecord::from_snapshot(&snapshot, self.sampler.current()));

        self.publisher.publish(snapshot.clone());
        Ok(Some(snapshot))
    }

    /// Tick until cancelled, then emit one final snapshot covering the
    /// partial window between the last tick and the cancellation instant.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), TrackerError> {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(self.window_size));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately.
        interval.tick().await;

        log_info!("metrics engine running at {:.1}s windows", self.window_size);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let now = self.clock.now();
                    match self.run_tick(now) {
                        Ok(_) => {
                            log_info!("metrics engine stopped after final window");
                            return Ok(());
                        }
                        Err(err) => {
                            log_error!("final metrics window failed: {err}");
                            return Err(err);
                        }
                    }
                }
                _ = interval.tick() => {
                    let now = self.clock.now();
                    if let Err(err) = self.run_tick(now) {
                        log_error!("metrics tick failed, engine stopping: {err}");
                        return Err(err);
                    }
                }
            }
        }
    }

    fn persist_record(&mut self, record: LogRecord) {
        if let Err(err) = self.persist.append(record) {
            // Capture and streaming keep running; complain once, not per
            // record.
            if !self.persist_warned {
                log_warn!("archival disabled for the rest of this run: {err}");
                self.persist_warned = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Event, EventKind, KeyAction};
    use tempfile::tempdir;

    fn key_event(t: f64, key: &str) -> Event {
        Event::new(
            t,
            EventKind::Keyboard {
                key: key.into(),
                action: KeyAction::Press,
            },
        )
    }

    fn engine(dir: &std::path::Path, config: &TrackerConfig) -> (MetricsEngine, EventQueue) {
        let queue = EventQueue::new(config.queue_capacity);
        let backend = ComputeBackend::new(config);
        let persist = PersistenceLog::open(dir, config).unwrap();
        let publisher = StreamPublisher::new(config.subscriber_buffer);
        let sampler = ResourceSampler::new(Duration::from_secs_f64(config.resource_refresh_seconds));
        let (state_tx, _state_rx) = watch::channel(BackendState::Uninitialized);
        let engine = MetricsEngine::new(
            config,
            queue.clone(),
            backend,
            TaskContext::new(),
            persist,
            publisher,
            sampler,
            MonotonicClock::new(),
            state_tx,
        );
        (engine, queue)
    }

    #[tokio::test]
    async fn empty_window_yields_zeroed_snapshot() {
        let dir = tempdir().unwrap();
        let (mut engine, _queue) = engine(dir.path(), &TrackerConfig::default());
        let start = engine.last_window_end;

        let snapshot = engine.run_tick(start + 1.0).unwrap().unwrap();
        assert_eq!(snapshot.window_start, start);
        assert_eq!(snapshot.window_end, start + 1.0);
        assert_eq!(snapshot.typing_speed_wpm, 0.0);
        assert_eq!(snapshot.error_rate, 0.0);
        assert_eq!(snapshot.focus_score, 0.0);
        assert_eq!(snapshot.cognitive_load.total, 0.0);
        assert!(!snapshot.degraded);
    }

    #[tokio::test]
    async fn windows_partition_the_timeline() {
        let dir = tempdir().unwrap();
        let (mut engine, queue) = engine(dir.path(), &TrackerConfig::default());
        let start = engine.last_window_end;

        for i in 0..30 {
            queue.push(key_event(start + 0.1 * i as f64, "a"));
        }

        let mut previous_end = start;
        for tick in 1..=3 {
            let now = start + tick as f64;
            let snapshot = engine.run_tick(now).unwrap().unwrap();
            // Consecutive, non-overlapping windows.
            assert_eq!(snapshot.window_start, previous_end);
            assert_eq!(snapshot.window_end, now);
            previous_end = now;
        }
        // Every queued event was consumed by exactly one window.
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn zero_width_window_is_skipped() {
        let dir = tempdir().unwrap();
        let (mut engine, _queue) = engine(dir.path(), &TrackerConfig::default());
        let start = engine.last_window_end;

        assert!(engine.run_tick(start + 1.0).unwrap().is_some());
        assert!(engine.run_tick(start + 1.0).unwrap().is_none());
        assert!(engine.run_tick(start + 0.5).unwrap().is_none());
    }

    #[tokio::test]
    async fn typing_metrics_flow_through_the_tick() {
        let dir = tempdir().unwrap();
        let config = TrackerConfig {
            window_size_seconds: 5.0,
            ..TrackerConfig::default()
        };
        let (mut engine, queue) = engine(dir.path(), &config);
        let start = engine.last_window_end;

        // 60 key presses over 5 seconds, 3 of them corrections.
        for i in 0..57 {
            queue.push(key_event(start + i as f64 * 0.08, "a"));
        }
        for i in 0..3 {
            queue.push(key_event(start + 4.6 + i as f64 * 0.1, "Backspace"));
        }

        let snapshot = engine.run_tick(start + 5.0).unwrap().unwrap();
        assert!((snapshot.typing_speed_wpm - 144.0).abs() < 1e-9);
        assert!((snapshot.error_rate - 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn snapshots_are_published_and_archived() {
        let dir = tempdir().unwrap();
        let config = TrackerConfig::default();
        let queue = EventQueue::new(config.queue_capacity);
        let backend = ComputeBackend::new(&config);
        let persist = PersistenceLog::open(dir.path(), &config).unwrap();
        let publisher = StreamPublisher::new(config.subscriber_buffer);
        let mut subscriber = publisher.subscribe();
        let sampler =
            ResourceSampler::new(Duration::from_secs_f64(config.resource_refresh_seconds));
        let (state_tx, state_rx) = watch::channel(BackendState::Uninitialized);

        let mut engine = MetricsEngine::new(
            &config,
            queue.clone(),
            backend,
            TaskContext::new(),
            persist.clone(),
            publisher,
            sampler,
            MonotonicClock::new(),
            state_tx,
        );
        let start = engine.last_window_end;

        queue.push(key_event(start + 0.2, "a"));
        queue.push(key_event(start + 0.4, "b"));
        engine.run_tick(start + 1.0).unwrap();

        let published = subscriber.recv().await.unwrap();
        assert_eq!(published.window_end, start + 1.0);

        // Two event records plus the snapshot record.
        persist.flush().unwrap();
        assert_eq!(persist.appended_count(), 3);

        // Backend state is observable after the first tick.
        assert_ne!(*state_rx.borrow(), BackendState::Uninitialized);
    }

    #[tokio::test]
    async fn task_id_is_stamped_on_overlapping_windows() {
        let dir = tempdir().unwrap();
        let config = TrackerConfig::default();
        let queue = EventQueue::new(config.queue_capacity);
        let backend = ComputeBackend::new(&config);
        let tasks = TaskContext::new();
        let persist = PersistenceLog::open(dir.path(), &config).unwrap();
        let publisher = StreamPublisher::new(config.subscriber_buffer);
        let sampler =
            ResourceSampler::new(Duration::from_secs_f64(config.resource_refresh_seconds));
        let (state_tx, _state_rx) = watch::channel(BackendState::Uninitialized);

        let mut engine = MetricsEngine::new(
            &config,
            queue.clone(),
            backend,
            tasks.clone(),
            persist,
            publisher,
            sampler,
            MonotonicClock::new(),
            state_tx,
        );
        let start = engine.last_window_end;

        let task = tasks.start_task("review", start + 0.5).unwrap();
        let snapshot = engine.run_tick(start + 1.0).unwrap().unwrap();
        assert_eq!(snapshot.task_id, Some(task.id));

        tasks.stop_task(start + 1.5);
        let snapshot = engine.run_tick(start + 2.0).unwrap().unwrap();
        assert_eq!(snapshot.task_id, Some(task.id));

        let snapshot = engine.run_tick(start + 3.0).unwrap().unwrap();
        assert_eq!(snapshot.task_id, None);
    }
}
