use crate::compute::batch::WindowBatch;
use crate::compute::WindowReduction;
use crate::config::LoadBands;
use crate::error::ComputeError;

/// Fallback reduction in f64. Always available; an error here means no
/// numeric output path remains and is fatal for the engine.
pub fn reduce(batch: &WindowBatch, bands: &LoadBands) -> Result<WindowReduction, ComputeError> {
    let window_secs = batch.window_secs();
    if !window_secs.is_finite() || window_secs <= 0.0 {
        return Err(ComputeError::FallbackFailed(format!(
            "non-positive window span {window_secs}"
        )));
    }

    let (typing_speed_wpm, error_rate) = super::exact_rates(batch);

    let mean_dwell_secs = if batch.dwell_secs.is_empty() {
        0.0
    } else {
        batch.dwell_secs.iter().sum::<f64>() / batch.dwell_secs.len() as f64
    };

    let (intrinsic_share, extraneous_share, germane_share) = band_shares(batch, bands);
    let (cpu_mean, cpu_std) = mean_std(batch.samples.iter().map(|s| s.cpu_pct));
    let (_, mem_std) = mean_std(batch.samples.iter().map(|s| s.mem_pct));

    let reduction = WindowReduction {
        keystroke_count: batch.keystroke_count,
        correction_count: batch.correction_count,
        typing_speed_wpm,
        error_rate,
        window_switches: batch.switch_count,
        mean_dwell_secs,
        intrinsic_share,
        extraneous_share,
        germane_share,
        cpu_mean,
        cpu_std,
        mem_std,
    };

    if !reduction.is_finite() {
        return Err(ComputeError::FallbackFailed(
            "reduction produced non-finite output".into(),
        ));
    }
    Ok(reduction)
}

/// Classify each sample into at most one band and return the time shares.
/// Samples below the idle floor belong to no band, so the shares need not
/// sum to one.
fn band_shares(batch: &WindowBatch, bands: &LoadBands) -> (f64, f64, f64) {
    if batch.samples.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let mut intrinsic = 0usize;
    let mut extraneous = 0usize;
    let mut germane = 0usize;

    let mut prev_cpu: Option<f64> = None;
    let mut prev_mem: Option<f64> = None;

    for sample in &batch.samples {
        let cpu = sample.cpu_pct;
        let mem = sample.mem_pct;

        let jump = prev_cpu.map(|p| (cpu - p).abs()).unwrap_or(0.0);
        let mem_growth = prev_mem.map(|p| mem - p).unwrap_or(0.0);

        if cpu < bands.idle_cpu_floor {
            // Idle: no band.
        } else if cpu >= bands.spike_cpu_ceiling || jump >= bands.spike_cpu_jump {
            extraneous += 1;
        } else if cpu >= bands.germane_cpu_floor && mem_growth >= bands.memory_growth_epsilon {
            germane += 1;
        } else {
            intrinsic += 1;
        }

        prev_cpu = Some(cpu);
        prev_mem = Some(mem);
    }

    let total = batch.samples.len() as f64;
    (
        intrinsic as f64 / total,
        extraneous as f64 / total,
        germane as f64 / total,
    )
}

fn mean_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let count = values.clone().count();
    if count == 0 {
        return (0.0, 0.0);
    }
    let n = count as f64;
    let mean = values.clone().sum::<f64>() / n;
    let variance = values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::batch::ResourceSample;

    fn batch_with_samples(samples: Vec<ResourceSample>) -> WindowBatch {
        WindowBatch {
            window_start: 0.0,
            window_end: 10.0,
            keystroke_count: 0,
            correction_count: 0,
            switch_count: 0,
            dwell_secs: vec![10.0],
            samples,
        }
    }

    fn sample(t: f64, cpu: f64, mem: f64) -> ResourceSample {
        ResourceSample {
            timestamp: t,
            cpu_pct: cpu,
            mem_pct: mem,
        }
    }

    #[test]
    fn steady_cpu_classifies_as_intrinsic() {
        let batch = batch_with_samples(vec![
            sample(1.0, 30.0, 50.0),
            sample(2.0, 32.0, 50.0),
            sample(3.0, 31.0, 50.0),
        ]);
        let (intrinsic, extraneous, germane) = band_shares(&batch, &LoadBands::default());
        assert!(intrinsic > 0.99);
        assert_eq!(extraneous, 0.0);
        assert_eq!(germane, 0.0);
    }

    #[test]
    fn spikes_classify_as_extraneous() {
        let batch = batch_with_samples(vec![
            sample(1.0, 20.0, 50.0),
            sample(2.0, 95.0, 50.0),
            sample(3.0, 20.0, 50.0),
        ]);
        let (_, extraneous, _) = band_shares(&batch, &LoadBands::default());
        // The 95% sample and the 75-point drop back both count as spikes.
        assert!(extraneous >= 2.0 / 3.0 - 1e-9);
    }

    #[test]
    fn sustained_cpu_with_memory_growth_is_germane() {
        let batch = batch_with_samples(vec![
            sample(1.0, 65.0, 50.0),
            sample(2.0, 68.0, 50.2),
            sample(3.0, 70.0, 50.4),
        ]);
        let (_, _, germane) = band_shares(&batch, &LoadBands::default());
        assert!(germane >= 2.0 / 3.0 - 1e-9);
    }

    #[test]
    fn idle_samples_belong_to_no_band() {
        let batch = batch_with_samples(vec![sample(1.0, 1.0, 40.0), sample(2.0, 2.0, 40.0)]);
        let (intrinsic, extraneous, germane) = band_shares(&batch, &LoadBands::default());
        assert_eq!(intrinsic + extraneous + germane, 0.0);
    }

    #[test]
    fn rejects_non_positive_window() {
        let mut batch = batch_with_samples(vec![]);
        batch.window_end = batch.window_start;
        assert!(reduce(&batch, &LoadBands::default()).is_err());
    }

    #[test]
    fn empty_batch_reduces_to_zeroes() {
        let batch = WindowBatch {
            window_start: 0.0,
            window_end: 1.0,
            keystroke_count: 0,
            correction_count: 0,
            switch_count: 0,
            dwell_secs: Vec::new(),
            samples: Vec::new(),
        };
        let reduction = reduce(&batch, &LoadBands::default()).unwrap();
        assert_eq!(reduction.typing_speed_wpm, 0.0);
        assert_eq!(reduction.error_rate, 0.0);
        assert_eq!(reduction.intrinsic_share, 0.0);
    }
}
