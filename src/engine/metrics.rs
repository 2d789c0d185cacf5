use crate::compute::WindowReduction;
use crate::models::CognitiveLoad;

/// Exponential decay applied per window switch when scoring focus.
const FOCUS_SWITCH_DECAY: f64 = 0.3;

/// CPU standard-deviation scale (percentage points) for resource stability.
const CPU_STABILITY_SCALE: f64 = 25.0;

/// Memory standard-deviation scale (percentage points) for resource
/// stability. Memory moves much less than CPU, so the scale is tighter.
const MEM_STABILITY_SCALE: f64 = 10.0;

/// Decay-weighted focus score: more switches and shorter dwell both lower
/// it. Clamped to [0, 1].
pub fn focus_score(reduction: &WindowReduction, window_secs: f64) -> f64 {
    if window_secs <= 0.0 || reduction.mean_dwell_secs <= 0.0 {
        return 0.0;
    }
    let dwell_factor = (reduction.mean_dwell_secs / window_secs).clamp(0.0, 1.0);
    let switch_decay = (-FOCUS_SWITCH_DECAY * f64::from(reduction.window_switches)).exp();
    (dwell_factor * switch_decay).clamp(0.0, 1.0)
}

/// Scale band time-shares to load sub-scores. Each sample lands in at most
/// one band, so the total stays within [0, 100] up to rounding; the clamp
/// guards the invariant against degenerate input.
pub fn cognitive_load(reduction: &WindowReduction) -> CognitiveLoad {
    let intrinsic = (reduction.intrinsic_share * 100.0).clamp(0.0, 100.0);
    let extraneous = (reduction.extraneous_share * 100.0).clamp(0.0, 100.0);
    let germane = (reduction.germane_share * 100.0).clamp(0.0, 100.0);
    let total = (intrinsic + extraneous + germane).clamp(0.0, 100.0);
    CognitiveLoad {
        intrinsic,
        extraneous,
        germane,
        total,
    }
}

/// Resource stability in [0, 1]: one when CPU and memory are flat across
/// the window, decaying with their dispersion.
pub fn resource_stability(reduction: &WindowReduction) -> f64 {
    let cpu = (-reduction.cpu_std / CPU_STABILITY_SCALE).exp();
    let mem = (-reduction.mem_std / MEM_STABILITY_SCALE).exp();
    (cpu * mem).clamp(0.0, 1.0)
}

/// Flow quality composite: weighted focus, inverse error rate, and resource
/// stability.
pub fn flow_quality(focus: f64, error_rate: f64, stability: f64) -> f64 {
    let inverse_error = (1.0 - error_rate).clamp(0.0, 1.0);
    (0.4 * focus + 0.3 * inverse_error + 0.3 * stability).clamp(0.0, 1.0)
}
