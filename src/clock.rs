use std::time::Instant;

/// Monotonic clock anchored at tracker construction. Event and window
/// timestamps are seconds since this anchor, so they are strictly
/// non-decreasing regardless of wall-clock adjustments.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    /// Seconds elapsed since the anchor.
    pub fn now(&self) -> f64 {
        self.anchor.elapsed().as_secs_f64()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_are_non_decreasing() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(a >= 0.0);
    }
}
