use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::models::MetricsSnapshot;

/// Fan-out of metrics snapshots to any number of subscribers.
///
/// Each subscriber owns a bounded buffer. When one falls behind, its oldest
/// pending snapshots are dropped and counted on that subscriber alone; the
/// publisher and every other subscriber keep running at full rate.
#[derive(Clone)]
pub struct StreamPublisher {
    sender: Arc<Mutex<Option<broadcast::Sender<MetricsSnapshot>>>>,
    capacity: usize,
}

impl StreamPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            capacity: capacity.max(1),
        }
    }

    /// Deliver one snapshot. Having no subscribers is not an error, and a
    /// subscriber that disconnected simply stops receiving.
    pub fn publish(&self, snapshot: MetricsSnapshot) {
        let guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sender) = guard.as_ref() {
            let _ = sender.send(snapshot);
        }
    }

    /// Attach a new subscriber. It sees snapshots published from now on.
    pub fn subscribe(&self) -> Subscriber {
        let guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let receiver = match guard.as_ref() {
            Some(sender) => sender.subscribe(),
            // Already closed; hand out a receiver that reports end-of-stream.
            None => broadcast::channel(self.capacity).0.subscribe(),
        };
        Subscriber {
            receiver,
            dropped: 0,
        }
    }

    /// Re-arm a closed stream for a new run. Subscribers from the previous
    /// run stay ended and must resubscribe.
    pub(crate) fn reopen(&self) {
        let mut guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_none() {
            let (sender, _) = broadcast::channel(self.capacity);
            *guard = Some(sender);
        }
    }

    /// End the stream. Subscribers drain what they have buffered, then see
    /// end-of-stream. Idempotent.
    pub fn close(&self) {
        let mut guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }
}

/// One consumer's view of the snapshot stream.
pub struct Subscriber {
    receiver: broadcast::Receiver<MetricsSnapshot>,
    dropped: u64,
}

impl Subscriber {
    /// Next snapshot, or `None` once the stream has closed and the buffer is
    /// drained. Snapshots lost to this subscriber's own backlog are skipped
    /// and tallied in [`Subscriber::dropped`].
    pub async fn recv(&mut self) -> Option<MetricsSnapshot> {
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Snapshots dropped from this subscriber's buffer because it lagged.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(end: f64) -> MetricsSnapshot {
        MetricsSnapshot::empty(end - 1.0, end)
    }

    #[tokio::test]
    async fn subscribers_receive_published_snapshots() {
        let publisher = StreamPublisher::new(8);
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();

        publisher.publish(snapshot(1.0));
        publisher.publish(snapshot(2.0));

        assert_eq!(a.recv().await.map(|s| s.window_end), Some(1.0));
        assert_eq!(a.recv().await.map(|s| s.window_end), Some(2.0));
        assert_eq!(b.recv().await.map(|s| s.window_end), Some(1.0));
        assert_eq!(b.recv().await.map(|s| s.window_end), Some(2.0));
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_only() {
        let publisher = StreamPublisher::new(4);
        let mut slow = publisher.subscribe();

        for i in 0..10 {
            publisher.publish(snapshot(i as f64 + 1.0));
        }

        // Buffer holds the 4 newest; the 6 oldest were dropped and counted.
        let first = slow.recv().await.unwrap();
        assert_eq!(first.window_end, 7.0);
        assert_eq!(slow.dropped(), 6);

        for expected in [8.0, 9.0, 10.0] {
            assert_eq!(slow.recv().await.unwrap().window_end, expected);
        }
        assert_eq!(slow.dropped(), 6);
    }

    #[tokio::test]
    async fn one_stalled_subscriber_does_not_slow_the_rest() {
        let publisher = StreamPublisher::new(4);
        let stalled = publisher.subscribe();
        let mut healthy: Vec<Subscriber> = (0..49).map(|_| publisher.subscribe()).collect();

        for i in 0..4 {
            publisher.publish(snapshot(i as f64 + 1.0));
        }

        for sub in &mut healthy {
            for expected in [1.0, 2.0, 3.0, 4.0] {
                assert_eq!(sub.recv().await.unwrap().window_end, expected);
            }
            assert_eq!(sub.dropped(), 0);
        }
        drop(stalled);
    }

    #[tokio::test]
    async fn close_drains_then_ends_stream() {
        let publisher = StreamPublisher::new(8);
        let mut sub = publisher.subscribe();

        publisher.publish(snapshot(1.0));
        publisher.close();
        publisher.close();

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn subscribe_after_close_sees_end_of_stream() {
        let publisher = StreamPublisher::new(8);
        publisher.close();
        let mut sub = publisher.subscribe();
        assert!(sub.recv().await.is_none());
    }
}
