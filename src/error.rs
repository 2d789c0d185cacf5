use thiserror::Error;

/// Errors surfaced by the tracker control surface.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("a task is already active: \"{0}\"")]
    AlreadyActiveTask(String),

    #[error("tracker is not running")]
    NotRunning,

    #[error("tracker is already running")]
    AlreadyRunning,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Both compute paths failed. No numeric output path remains, so the
    /// engine cannot continue.
    #[error("compute backend failed on both paths: {0}")]
    ComputeFatal(String),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Per-input-class capture failures. These degrade one class and leave the
/// rest of capture running.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("hook unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("permission denied installing hook: {0}")]
    PermissionDenied(String),

    #[error("hook installation failed: {0}")]
    InstallFailed(String),
}

/// Failures inside the compute backend.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("no accelerated device available: {0}")]
    DeviceUnavailable(String),

    #[error("device execution failed: {0}")]
    DeviceFailed(String),

    #[error("device memory utilization {used:.2} exceeds threshold {threshold:.2}")]
    MemoryPressure { used: f64, threshold: f64 },

    #[error("device call exceeded latency budget of {budget_ms}ms")]
    LatencyBudgetExceeded { budget_ms: u64 },

    /// The CPU path produced no usable output. Terminal for the backend.
    #[error("fallback path failed: {0}")]
    FallbackFailed(String),
}

/// Failures inside the persistence log.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("write retries exhausted after {attempts} attempts: {reason}")]
    RetryExhausted { attempts: usize, reason: String },

    #[error("persistence worker is no longer running")]
    WorkerGone,

    #[error("failed to open log directory {path}: {reason}")]
    OpenFailed { path: String, reason: String },
}
