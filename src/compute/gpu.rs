use crate::compute::batch::WindowBatch;
use crate::compute::WindowReduction;
use crate::config::LoadBands;
use crate::error::ComputeError;

/// Accelerated compute device. The production implementation sits on an
/// NVML handle; tests inject failing or slow devices to exercise the
/// fallback transitions.
pub trait AccelDevice: Send {
    fn name(&self) -> String;

    /// Device memory utilization as a fraction in [0, 1].
    fn memory_utilization(&self) -> Result<f64, ComputeError>;

    fn reduce(
        &mut self,
        batch: &WindowBatch,
        bands: &LoadBands,
    ) -> Result<WindowReduction, ComputeError>;
}

/// Acquire the default accelerated device.
#[cfg(feature = "nvml")]
pub fn acquire_device() -> Result<Box<dyn AccelDevice>, ComputeError> {
    NvmlDevice::acquire().map(|device| Box::new(device) as Box<dyn AccelDevice>)
}

#[cfg(not(feature = "nvml"))]
pub fn acquire_device() -> Result<Box<dyn AccelDevice>, ComputeError> {
    Err(ComputeError::DeviceUnavailable(
        "built without the nvml feature".into(),
    ))
}

/// Single-precision reduction used by the accelerated path. Rates derived
/// from integer counts stay exact; band shares and dispersion are computed
/// in f32 and agree with the fallback within documented tolerance (≤1%).
pub fn reduce_f32(batch: &WindowBatch, bands: &LoadBands) -> Result<WindowReduction, ComputeError> {
    let window_secs = batch.window_secs();
    if !window_secs.is_finite() || window_secs <= 0.0 {
        return Err(ComputeError::DeviceFailed(format!(
            "non-positive window span {window_secs}"
        )));
    }

    let (typing_speed_wpm, error_rate) = super::exact_rates(batch);

    let dwell: Vec<f32> = batch.dwell_secs.iter().map(|&d| d as f32).collect();
    let mean_dwell_secs = if dwell.is_empty() {
        0.0
    } else {
        f64::from(dwell.iter().sum::<f32>() / dwell.len() as f32)
    };

    let cpu: Vec<f32> = batch.samples.iter().map(|s| s.cpu_pct as f32).collect();
    let mem: Vec<f32> = batch.samples.iter().map(|s| s.mem_pct as f32).collect();

    let (intrinsic_share, extraneous_share, germane_share) = band_shares_f32(&cpu, &mem, bands);
    let (cpu_mean, cpu_std) = mean_std_f32(&cpu);
    let (_, mem_std) = mean_std_f32(&mem);

    Ok(WindowReduction {
        keystroke_count: batch.keystroke_count,
        correction_count: batch.correction_count,
        typing_speed_wpm,
        error_rate,
        window_switches: batch.switch_count,
        mean_dwell_secs,
        intrinsic_share,
        extraneous_share,
        germane_share,
        cpu_mean: f64::from(cpu_mean),
        cpu_std: f64::from(cpu_std),
        mem_std: f64::from(mem_std),
    })
}

fn band_shares_f32(cpu: &[f32], mem: &[f32], bands: &LoadBands) -> (f64, f64, f64) {
    if cpu.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let idle_floor = bands.idle_cpu_floor as f32;
    let germane_floor = bands.germane_cpu_floor as f32;
    let spike_jump = bands.spike_cpu_jump as f32;
    let spike_ceiling = bands.spike_cpu_ceiling as f32;
    let growth_epsilon = bands.memory_growth_epsilon as f32;

    let mut intrinsic = 0usize;
    let mut extraneous = 0usize;
    let mut germane = 0usize;

    for i in 0..cpu.len() {
        let jump = if i == 0 { 0.0 } else { (cpu[i] - cpu[i - 1]).abs() };
        let growth = if i == 0 { 0.0 } else { mem[i] - mem[i - 1] };

        if cpu[i] < idle_floor {
            // Idle: no band.
        } else if cpu[i] >= spike_ceiling || jump >= spike_jump {
            extraneous += 1;
        } else if cpu[i] >= germane_floor && growth >= growth_epsilon {
            germane += 1;
        } else {
            intrinsic += 1;
        }
    }

    let total = cpu.len() as f64;
    (
        intrinsic as f64 / total,
        extraneous as f64 / total,
        germane as f64 / total,
    )
}

fn mean_std_f32(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    (mean, variance.sqrt())
}

/// NVML-backed device: acquisition proves a device exists, the memory gate
/// reads live device memory, and batches reduce in single precision.
#[cfg(feature = "nvml")]
pub struct NvmlDevice {
    nvml: nvml_wrapper::Nvml,
    index: u32,
    name: String,
}

#[cfg(feature = "nvml")]
impl NvmlDevice {
    pub fn acquire() -> Result<Self, ComputeError> {
        let nvml = nvml_wrapper::Nvml::init()
            .map_err(|err| ComputeError::DeviceUnavailable(err.to_string()))?;

        let count = nvml
            .device_count()
            .map_err(|err| ComputeError::DeviceUnavailable(err.to_string()))?;
        if count == 0 {
            return Err(ComputeError::DeviceUnavailable("no devices found".into()));
        }

        let name = nvml
            .device_by_index(0)
            .and_then(|device| device.name())
            .map_err(|err| ComputeError::DeviceUnavailable(err.to_string()))?;

        Ok(Self {
            nvml,
            index: 0,
            name,
        })
    }
}

#[cfg(feature = "nvml")]
impl AccelDevice for NvmlDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn memory_utilization(&self) -> Result<f64, ComputeError> {
        let device = self
            .nvml
            .device_by_index(self.index)
            .map_err(|err| ComputeError::DeviceFailed(err.to_string()))?;
        let info = device
            .memory_info()
            .map_err(|err| ComputeError::DeviceFailed(err.to_string()))?;
        if info.total == 0 {
            return Ok(0.0);
        }
        Ok(info.used as f64 / info.total as f64)
    }

    fn reduce(
        &mut self,
        batch: &WindowBatch,
        bands: &LoadBands,
    ) -> Result<WindowReduction, ComputeError> {
        reduce_f32(batch, bands)
    }
}
