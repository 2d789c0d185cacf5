use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Resource-usage band boundaries used to classify sampled intervals into
/// intrinsic / extraneous / germane load. These are heuristic tunables,
/// not validated constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBands {
    /// Samples with CPU below this percentage belong to no band.
    pub idle_cpu_floor: f64,

    /// Sustained CPU at or above this percentage, combined with memory
    /// growth, classifies as germane (integrative effort).
    pub germane_cpu_floor: f64,

    /// A jump of at least this many CPU percentage points between adjacent
    /// samples classifies as extraneous (overhead spike).
    pub spike_cpu_jump: f64,

    /// CPU at or above this percentage always classifies as extraneous.
    pub spike_cpu_ceiling: f64,

    /// Minimum memory-percentage increase between adjacent samples that
    /// counts as memory growth for the germane band.
    pub memory_growth_epsilon: f64,
}

impl Default for LoadBands {
    fn default() -> Self {
        Self {
            idle_cpu_floor: 5.0,
            germane_cpu_floor: 60.0,
            spike_cpu_jump: 25.0,
            spike_cpu_ceiling: 90.0,
            memory_growth_epsilon: 0.05,
        }
    }
}

/// Tracker configuration. Validated once at construction and never mutated
/// at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerConfig {
    /// Width of a metrics window in seconds. Also the engine tick interval.
    pub window_size_seconds: f64,

    /// Capacity of the bounded capture queue. On overflow the oldest
    /// unconsumed event is dropped and counted.
    pub queue_capacity: usize,

    /// Device memory utilization fraction above which the accelerated path
    /// falls back to CPU. Range (0, 1].
    pub memory_threshold: f64,

    /// Flow-state quality threshold. Range [0, 1].
    pub flow_quality_threshold: f64,

    /// Maximum seconds between persistence flushes.
    pub flush_interval_seconds: f64,

    /// Maximum buffered records before a persistence flush.
    pub flush_record_threshold: usize,

    /// Latency budget per accelerated batch call, in milliseconds. A call
    /// that exceeds it triggers the one-way CPU fallback.
    pub device_latency_budget_ms: u64,

    /// Minimum seconds between resource-snapshot refreshes. Events are
    /// stamped from the cached snapshot, never sampled per event.
    pub resource_refresh_seconds: f64,

    /// Maximum seconds `stop()` waits for the final partial-window snapshot.
    pub shutdown_timeout_seconds: f64,

    /// Per-subscriber snapshot buffer. A subscriber that falls further behind
    /// loses the oldest buffered snapshots.
    pub subscriber_buffer: usize,

    /// Bounded retry attempts for persistence writes.
    pub persist_max_retries: usize,

    pub load_bands: LoadBands,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_size_seconds: 1.0,
            queue_capacity: 4096,
            memory_threshold: 0.8,
            flow_quality_threshold: 0.8,
            flush_interval_seconds: 5.0,
            flush_record_threshold: 100,
            device_latency_budget_ms: 250,
            resource_refresh_seconds: 1.0,
            shutdown_timeout_seconds: 5.0,
            subscriber_buffer: 64,
            persist_max_retries: 5,
            load_bands: LoadBands::default(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if !self.window_size_seconds.is_finite() || self.window_size_seconds <= 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "window_size_seconds must be positive, got {}",
                self.window_size_seconds
            )));
        }
        if self.queue_capacity == 0 {
            return Err(TrackerError::InvalidConfig(
                "queue_capacity must be greater than zero".into(),
            ));
        }
        if !(self.memory_threshold > 0.0 && self.memory_threshold <= 1.0) {
            return Err(TrackerError::InvalidConfig(format!(
                "memory_threshold must be in (0, 1], got {}",
                self.memory_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.flow_quality_threshold) {
            return Err(TrackerError::InvalidConfig(format!(
                "flow_quality_threshold must be in [0, 1], got {}",
                self.flow_quality_threshold
            )));
        }
        if !self.flush_interval_seconds.is_finite() || self.flush_interval_seconds <= 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "flush_interval_seconds must be positive, got {}",
                self.flush_interval_seconds
            )));
        }
        if self.flush_record_threshold == 0 {
            return Err(TrackerError::InvalidConfig(
                "flush_record_threshold must be greater than zero".into(),
            ));
        }
        if self.subscriber_buffer == 0 {
            return Err(TrackerError::InvalidConfig(
                "subscriber_buffer must be greater than zero".into(),
            ));
        }
        if self.persist_max_retries == 0 {
            return Err(TrackerError::InvalidConfig(
                "persist_max_retries must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TrackerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_window() {
        let config = TrackerConfig {
            window_size_seconds: 0.0,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_memory_threshold() {
        let config = TrackerConfig {
            memory_threshold: 1.5,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = TrackerConfig {
            memory_threshold: 0.0,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_queue_capacity() {
        let config = TrackerConfig {
            queue_capacity: 0,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
