use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sysinfo::System;

use crate::models::ResourceUsage;

#[cfg(feature = "nvml")]
use log::warn;

/// Cached system-resource sampler.
///
/// Refreshing `sysinfo` on every input event would dominate capture cost, so
/// readings are cached and refreshed at a bounded rate (default 1 Hz).
/// `current()` is cheap enough to call from a capture callback.
#[derive(Clone)]
pub struct ResourceSampler {
    inner: Arc<Mutex<SamplerState>>,
    refresh_interval: Duration,
}

struct SamplerState {
    system: System,
    #[cfg(feature = "nvml")]
    nvml: Option<nvml_wrapper::Nvml>,
    last_refresh: Option<Instant>,
    cached: ResourceUsage,
}

impl ResourceSampler {
    pub fn new(refresh_interval: Duration) -> Self {
        let mut system = System::new();
        // Establish the baseline so the first delta-based CPU reading is real.
        system.refresh_cpu_usage();
        system.refresh_memory();

        #[cfg(feature = "nvml")]
        let nvml = match nvml_wrapper::Nvml::init() {
            Ok(nvml) => Some(nvml),
            Err(err) => {
                warn!("NVML unavailable for resource sampling: {err}");
                None
            }
        };

        Self {
            inner: Arc::new(Mutex::new(SamplerState {
                system,
                #[cfg(feature = "nvml")]
                nvml,
                last_refresh: None,
                cached: ResourceUsage::default(),
            })),
            refresh_interval,
        }
    }

    /// Current cached usage, refreshing first if the cache is stale.
    pub fn current(&self) -> ResourceUsage {
        let mut state = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let stale = state
            .last_refresh
            .map(|at| at.elapsed() >= self.refresh_interval)
            .unwrap_or(true);

        if stale {
            state.system.refresh_cpu_usage();
            state.system.refresh_memory();

            let cpu_pct = f64::from(state.system.global_cpu_usage());
            let total = state.system.total_memory();
            let mem_pct = if total > 0 {
                state.system.used_memory() as f64 / total as f64 * 100.0
            } else {
                0.0
            };

            state.cached = ResourceUsage {
                cpu_pct,
                mem_pct,
                gpu_pct: Self::gpu_usage(&state),
            };
            state.last_refresh = Some(Instant::now());
        }

        state.cached
    }

    #[cfg(feature = "nvml")]
    fn gpu_usage(state: &SamplerState) -> Option<f64> {
        let nvml = state.nvml.as_ref()?;
        let device = nvml.device_by_index(0).ok()?;
        let rates = device.utilization_rates().ok()?;
        Some(f64::from(rates.gpu))
    }

    #[cfg(not(feature = "nvml"))]
    fn gpu_usage(_state: &SamplerState) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_are_cached_between_refreshes() {
        let sampler = ResourceSampler::new(Duration::from_secs(60));
        let first = sampler.current();
        let second = sampler.current();
        // With a 60s refresh interval the second call must serve the cache.
        assert_eq!(first, second);
    }

    #[test]
    fn memory_percentage_is_in_range() {
        let sampler = ResourceSampler::new(Duration::from_millis(0));
        let usage = sampler.current();
        assert!(usage.mem_pct >= 0.0 && usage.mem_pct <= 100.0);
    }
}
