use crate::models::{Event, EventKind};

/// One resource observation inside a window, taken from an event's stamped
/// usage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub timestamp: f64,
    pub cpu_pct: f64,
    pub mem_pct: f64,
}

/// Raw per-window quantities both compute paths reduce from. Extraction is
/// shared so the accelerated and fallback paths always see identical input.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowBatch {
    pub window_start: f64,
    pub window_end: f64,
    pub keystroke_count: u32,
    pub correction_count: u32,
    pub switch_count: u32,
    /// Spans between consecutive focus changes, bounded by the window edges.
    pub dwell_secs: Vec<f64>,
    pub samples: Vec<ResourceSample>,
}

impl WindowBatch {
    pub fn window_secs(&self) -> f64 {
        self.window_end - self.window_start
    }

    pub fn is_empty(&self) -> bool {
        self.keystroke_count == 0 && self.switch_count == 0 && self.samples.is_empty()
    }

    /// Extract the batch for `events`, all of which must fall inside
    /// `[window_start, window_end)`.
    pub fn extract(events: &[Event], window_start: f64, window_end: f64) -> Self {
        let mut keystroke_count = 0u32;
        let mut correction_count = 0u32;
        let mut switch_times = Vec::new();
        let mut samples = Vec::with_capacity(events.len());

        for event in events {
            if event.kind.is_keystroke() {
                keystroke_count += 1;
            }
            if event.kind.is_correction() {
                correction_count += 1;
            }
            if matches!(event.kind, EventKind::WindowFocus { .. }) {
                switch_times.push(event.timestamp);
            }
            samples.push(ResourceSample {
                timestamp: event.timestamp,
                cpu_pct: event.resources.cpu_pct,
                mem_pct: event.resources.mem_pct,
            });
        }

        let dwell_secs = dwell_intervals(&switch_times, window_start, window_end, !events.is_empty());

        Self {
            window_start,
            window_end,
            keystroke_count,
            correction_count,
            switch_count: switch_times.len() as u32,
            dwell_secs,
            samples,
        }
    }
}

/// Dwell spans between focus changes. With no switches the whole window is
/// one dwell (provided any activity was observed); with switches the window
/// splits at each switch timestamp.
fn dwell_intervals(
    switch_times: &[f64],
    window_start: f64,
    window_end: f64,
    had_events: bool,
) -> Vec<f64> {
    if switch_times.is_empty() {
        if had_events {
            return vec![(window_end - window_start).max(0.0)];
        }
        return Vec::new();
    }

    let mut intervals = Vec::with_capacity(switch_times.len() + 1);
    let mut prev = window_start;
    for &t in switch_times {
        let span = (t - prev).max(0.0);
        if span > 0.0 {
            intervals.push(span);
        }
        prev = t;
    }
    let tail = (window_end - prev).max(0.0);
    if tail > 0.0 {
        intervals.push(tail);
    }
    intervals
}
