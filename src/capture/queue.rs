use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::Event;

/// Bounded event queue between capture producers and the engine consumer.
///
/// Pushes never block: on overflow the oldest unconsumed event is dropped
/// and counted, because blocking an OS input callback can stall input
/// delivery system-wide.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<Mutex<VecDeque<Event>>>,
    capacity: usize,
    overflow_count: Arc<AtomicU64>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be greater than zero");
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            overflow_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue an event, dropping the oldest entry if the queue is full.
    /// Returns `true` if an old event was dropped.
    pub fn push(&self, event: Event) -> bool {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut dropped = false;
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            dropped = true;
        }
        guard.push_back(event);
        dropped
    }

    /// Remove and return all events with `timestamp < before`, preserving
    /// arrival order.
    pub fn drain_before(&self, before: f64) -> Vec<Event> {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut drained = Vec::new();
        // Front is always the oldest, so popping preserves order.
        while guard.front().is_some_and(|front| front.timestamp < before) {
            if let Some(event) = guard.pop_front() {
                drained.push(event);
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Total events dropped due to overflow since construction.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventKind, KeyAction};

    fn key_event(timestamp: f64, key: &str) -> Event {
        Event::new(
            timestamp,
            EventKind::Keyboard {
                key: key.into(),
                action: KeyAction::Press,
            },
        )
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let queue = EventQueue::new(3);
        for i in 0..5 {
            queue.push(key_event(i as f64, "a"));
        }

        assert_eq!(queue.overflow_count(), 2);
        let drained = queue.drain_before(f64::MAX);
        let timestamps: Vec<f64> = drained.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn drain_before_respects_boundary() {
        let queue = EventQueue::new(10);
        for i in 0..6 {
            queue.push(key_event(i as f64, "a"));
        }

        let drained = queue.drain_before(3.0);
        assert_eq!(drained.len(), 3);
        assert!(drained.iter().all(|e| e.timestamp < 3.0));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn drain_preserves_arrival_order() {
        let queue = EventQueue::new(10);
        for i in 0..4 {
            queue.push(key_event(i as f64 * 0.1, "a"));
        }
        let drained = queue.drain_before(10.0);
        for pair in drained.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }
}
