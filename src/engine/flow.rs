use crate::models::FlowState;

/// Tracks flow streaks across consecutive windows. A window whose quality
/// meets the threshold extends the streak; any other window breaks it.
pub struct FlowTracker {
    threshold: f64,
    depth: u32,
    streak_started_at: Option<f64>,
}

impl FlowTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            depth: 0,
            streak_started_at: None,
        }
    }

    /// Fold one window's quality into the streak and return the flow state
    /// for that window.
    pub fn observe(&mut self, quality: f64, window_start: f64, window_end: f64) -> FlowState {
        if quality >= self.threshold {
            if self.depth == 0 {
                self.streak_started_at = Some(window_start);
            }
            self.depth += 1;
            let started = self.streak_started_at.unwrap_or(window_start);
            FlowState {
                depth: self.depth,
                duration_secs: (window_end - started).max(0.0),
                quality,
            }
        } else {
            self.depth = 0;
            self.streak_started_at = None;
            FlowState {
                depth: 0,
                duration_secs: 0.0,
                quality,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifying_windows_accumulate_depth_and_duration() {
        let mut tracker = FlowTracker::new(0.8);

        let first = tracker.observe(0.9, 0.0, 1.0);
        assert_eq!(first.depth, 1);
        assert!((first.duration_secs - 1.0).abs() < 1e-9);

        let second = tracker.observe(0.85, 1.0, 2.0);
        assert_eq!(second.depth, 2);
        assert!((second.duration_secs - 2.0).abs() < 1e-9);
    }

    #[test]
    fn low_quality_breaks_the_streak() {
        let mut tracker = FlowTracker::new(0.8);
        tracker.observe(0.9, 0.0, 1.0);
        tracker.observe(0.9, 1.0, 2.0);

        let broken = tracker.observe(0.2, 2.0, 3.0);
        assert_eq!(broken.depth, 0);
        assert_eq!(broken.duration_secs, 0.0);

        // A later qualifying window starts a fresh streak.
        let fresh = tracker.observe(0.95, 3.0, 4.0);
        assert_eq!(fresh.depth, 1);
        assert!((fresh.duration_secs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut tracker = FlowTracker::new(0.8);
        let state = tracker.observe(0.8, 0.0, 1.0);
        assert_eq!(state.depth, 1);
    }
}
