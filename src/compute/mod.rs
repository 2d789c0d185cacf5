mod batch;
mod cpu;
mod gpu;

pub use batch::{ResourceSample, WindowBatch};
pub use gpu::{acquire_device, reduce_f32, AccelDevice};

#[cfg(feature = "nvml")]
pub use gpu::NvmlDevice;

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::config::{LoadBands, TrackerConfig};
use crate::error::ComputeError;

/// Output schema shared by the accelerated and fallback paths.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowReduction {
    pub keystroke_count: u32,
    pub correction_count: u32,
    pub typing_speed_wpm: f64,
    pub error_rate: f64,
    pub window_switches: u32,
    pub mean_dwell_secs: f64,
    /// Band time-shares in [0, 1]. Idle samples belong to no band, so the
    /// three shares need not sum to one.
    pub intrinsic_share: f64,
    pub extraneous_share: f64,
    pub germane_share: f64,
    pub cpu_mean: f64,
    pub cpu_std: f64,
    pub mem_std: f64,
}

impl WindowReduction {
    pub fn is_finite(&self) -> bool {
        [
            self.typing_speed_wpm,
            self.error_rate,
            self.mean_dwell_secs,
            self.intrinsic_share,
            self.extraneous_share,
            self.germane_share,
            self.cpu_mean,
            self.cpu_std,
            self.mem_std,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Typing rates derived from integer counts. Both compute paths call this,
/// so they agree on these two values exactly.
fn exact_rates(batch: &WindowBatch) -> (f64, f64) {
    let window_secs = batch.window_secs();
    let minutes = window_secs / 60.0;
    let typing_speed_wpm = if minutes > 0.0 {
        (f64::from(batch.keystroke_count) / 5.0) / minutes
    } else {
        0.0
    };
    let error_rate =
        f64::from(batch.correction_count) / f64::from(batch.keystroke_count.max(1));
    (typing_speed_wpm, error_rate)
}

/// Backend lifecycle. Fallback transitions are one-way for the process
/// lifetime so a flaky device cannot flap the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    GpuReady,
    CpuFallback,
    Failed,
}

impl BackendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendState::Uninitialized => "uninitialized",
            BackendState::GpuReady => "gpuReady",
            BackendState::CpuFallback => "cpuFallback",
            BackendState::Failed => "failed",
        }
    }
}

enum DeviceJob {
    Reduce {
        batch: WindowBatch,
        bands: LoadBands,
        memory_threshold: f64,
        reply: mpsc::Sender<Result<WindowReduction, ComputeError>>,
    },
    Shutdown,
}

/// Dedicated thread owning the device handle. Callers wait on a bounded
/// timeout so a hung device call can never stall the tick cadence.
struct DeviceWorker {
    sender: mpsc::Sender<DeviceJob>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceWorker {
    fn spawn(mut device: Box<dyn AccelDevice>) -> Result<Self, ComputeError> {
        let (sender, receiver) = mpsc::channel::<DeviceJob>();

        let handle = thread::Builder::new()
            .name("cogload-device".into())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    match job {
                        DeviceJob::Reduce {
                            batch,
                            bands,
                            memory_threshold,
                            reply,
                        } => {
                            let result = run_device_batch(
                                device.as_mut(),
                                &batch,
                                &bands,
                                memory_threshold,
                            );
                            // Receiver may have timed out and moved on.
                            let _ = reply.send(result);
                        }
                        DeviceJob::Shutdown => break,
                    }
                }
            })
            .map_err(|err| ComputeError::DeviceFailed(format!("worker spawn failed: {err}")))?;

        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    fn reduce(
        &self,
        batch: &WindowBatch,
        bands: &LoadBands,
        memory_threshold: f64,
        budget: Duration,
    ) -> Result<WindowReduction, ComputeError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.sender
            .send(DeviceJob::Reduce {
                batch: batch.clone(),
                bands: bands.clone(),
                memory_threshold,
                reply: reply_tx,
            })
            .map_err(|_| ComputeError::DeviceFailed("device worker exited".into()))?;

        match reply_rx.recv_timeout(budget) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ComputeError::LatencyBudgetExceeded {
                budget_ms: budget.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ComputeError::DeviceFailed("device worker exited".into()))
            }
        }
    }

    /// Orderly stop: the worker is known responsive, so join it.
    fn shutdown(mut self) {
        let _ = self.sender.send(DeviceJob::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("device worker panicked during shutdown");
            }
        }
    }

    /// Walk away from a possibly hung worker without joining it.
    fn detach(mut self) {
        self.handle.take();
    }
}

fn run_device_batch(
    device: &mut dyn AccelDevice,
    batch: &WindowBatch,
    bands: &LoadBands,
    memory_threshold: f64,
) -> Result<WindowReduction, ComputeError> {
    let used = device.memory_utilization()?;
    if used > memory_threshold {
        return Err(ComputeError::MemoryPressure {
            used,
            threshold: memory_threshold,
        });
    }
    device.reduce(batch, bands)
}

/// Stateful batched reducer over event windows.
///
/// `Uninitialized → {GpuReady | CpuFallback} → Failed`. Device acquisition
/// happens once; any accelerated-path failure afterwards (error, memory
/// pressure, latency budget) transitions one-way to the CPU path. `Failed`
/// is reached only when the CPU path itself cannot produce output.
pub struct ComputeBackend {
    state: BackendState,
    worker: Option<DeviceWorker>,
    memory_threshold: f64,
    latency_budget: Duration,
    bands: LoadBands,
}

impl ComputeBackend {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            state: BackendState::Uninitialized,
            worker: None,
            memory_threshold: config.memory_threshold,
            latency_budget: Duration::from_millis(config.device_latency_budget_ms),
            bands: config.load_bands.clone(),
        }
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    /// Attempt device acquisition. Any initialization error lands in
    /// `CpuFallback`, terminal for this process lifetime — no retry storm.
    pub fn initialize(&mut self) {
        if self.state != BackendState::Uninitialized {
            return;
        }
        match acquire_device() {
            Ok(device) => self.install_device(device),
            Err(err) => {
                info!("no accelerated device, using CPU path: {err}");
                self.state = BackendState::CpuFallback;
            }
        }
    }

    /// Initialize with an explicit device. Used by hosts with their own
    /// device selection and by tests.
    pub fn install_device(&mut self, device: Box<dyn AccelDevice>) {
        if self.state != BackendState::Uninitialized {
            return;
        }
        let name = device.name();
        match DeviceWorker::spawn(device) {
            Ok(worker) => {
                info!("accelerated compute path ready on {name}");
                self.worker = Some(worker);
                self.state = BackendState::GpuReady;
            }
            Err(err) => {
                warn!("device worker failed to start, using CPU path: {err}");
                self.state = BackendState::CpuFallback;
            }
        }
    }

    /// Reduce one window batch. The boolean is true when the accelerated
    /// path failed this call and the result came from the same-tick CPU
    /// recomputation.
    pub fn reduce(
        &mut self,
        batch: &WindowBatch,
    ) -> Result<(WindowReduction, bool), ComputeError> {
        if self.state == BackendState::Uninitialized {
            self.initialize();
        }

        match self.state {
            BackendState::GpuReady => {
                let outcome = match self.worker.as_ref() {
                    Some(worker) => {
                        worker.reduce(batch, &self.bands, self.memory_threshold, self.latency_budget)
                    }
                    None => Err(ComputeError::DeviceFailed("device worker missing".into())),
                };

                match outcome {
                    Ok(reduction) => Ok((reduction, false)),
                    Err(err) => {
                        self.fall_back(&err);
                        let reduction = self.cpu_reduce(batch)?;
                        Ok((reduction, true))
                    }
                }
            }
            BackendState::CpuFallback => self.cpu_reduce(batch).map(|r| (r, false)),
            BackendState::Failed => Err(ComputeError::FallbackFailed(
                "backend is in failed state".into(),
            )),
            BackendState::Uninitialized => {
                // initialize() above always leaves GpuReady or CpuFallback.
                self.cpu_reduce(batch).map(|r| (r, false))
            }
        }
    }

    /// Release device handles. Safe to call repeatedly; part of tracker
    /// shutdown.
    pub fn release(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    fn cpu_reduce(&mut self, batch: &WindowBatch) -> Result<WindowReduction, ComputeError> {
        match cpu::reduce(batch, &self.bands) {
            Ok(reduction) => Ok(reduction),
            Err(err) => {
                error!("CPU compute path failed, backend is now failed: {err}");
                self.state = BackendState::Failed;
                Err(err)
            }
        }
    }

    /// One-way transition to the CPU path, logged once by construction.
    fn fall_back(&mut self, err: &ComputeError) {
        warn!("accelerated path disabled for the rest of this run: {err}");
        if let Some(worker) = self.worker.take() {
            match err {
                // A blown latency budget may mean a hung device call; do not
                // wait on that thread.
                ComputeError::LatencyBudgetExceeded { .. } => worker.detach(),
                _ => worker.shutdown(),
            }
        }
        self.state = BackendState::CpuFallback;
    }
}

impl Drop for ComputeBackend {
    fn drop(&mut self) {
        self.release();
    }
}
