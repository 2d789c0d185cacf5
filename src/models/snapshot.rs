use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Heuristic decomposition of resource-usage patterns within one window.
/// Sub-scores are band time-shares scaled to [0, 100]; `total` is their sum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveLoad {
    pub intrinsic: f64,
    pub extraneous: f64,
    pub germane: f64,
    pub total: f64,
}

/// Heuristic flow-state composite for one window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    /// Consecutive qualifying windows, including this one. Zero outside flow.
    pub depth: u32,
    /// Seconds since the current qualifying streak began. Zero outside flow.
    pub duration_secs: f64,
    /// Composite quality in [0, 1].
    pub quality: f64,
}

/// One window's worth of derived metrics. Created by the engine each tick,
/// owned by value by persistence and streaming, never mutated after emission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub window_start: f64,
    pub window_end: f64,
    pub typing_speed_wpm: f64,
    pub error_rate: f64,
    pub focus_score: f64,
    pub cognitive_load: CognitiveLoad,
    pub flow_state: FlowState,
    pub task_id: Option<Uuid>,
    /// True when this window was computed by the fallback path after an
    /// accelerated-path failure on the same tick.
    pub degraded: bool,
}

impl MetricsSnapshot {
    /// Zero-valued snapshot for an empty window. Emitted so consumers see
    /// exactly one snapshot per tick.
    pub fn empty(window_start: f64, window_end: f64) -> Self {
        Self {
            window_start,
            window_end,
            typing_speed_wpm: 0.0,
            error_rate: 0.0,
            focus_score: 0.0,
            cognitive_load: CognitiveLoad::default(),
            flow_state: FlowState::default(),
            task_id: None,
            degraded: false,
        }
    }
}
