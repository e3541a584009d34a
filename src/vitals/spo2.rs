//! Windowed SpO2 + secondary heart-rate estimation.
//!
//! Ratio-of-ratios pulse oximetry over one full `Spo2Window`: the pulsatile
//! (AC) and baseline (DC) components of the red and infrared channels give
//!
//! ```text
//! R = (AC_red / DC_red) / (AC_ir / DC_ir)
//! SpO2 = 110 - 25 * R      (empirical calibration, clamped to [0, 100])
//! ```
//!
//! The infrared channel additionally yields a secondary heart-rate estimate
//! from the median inter-peak interval of detected systolic peaks. Both
//! outputs carry validity flags; range acceptance on top of validity is the
//! pipeline's job.

use std::f64::consts::PI;

/// Upper cutoff for pre-smoothing, well above heart-rate harmonics
const SMOOTH_CUTOFF_HZ: f64 = 8.0;
/// Cardiac band used for AC extraction and peak detection
const CARDIAC_LOW_HZ: f64 = 0.5;
const CARDIAC_HIGH_HZ: f64 = 5.0;
/// Peak-distance floor derived from a 240 BPM ceiling
const MAX_RATE_BPM: f64 = 240.0;

/// Output of one window estimation. Values are meaningless when the
/// corresponding validity flag is false.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spo2Estimate {
    pub spo2: f64,
    pub spo2_valid: bool,
    /// Secondary heart rate in BPM, from infrared peak timing
    pub heart_rate: f64,
    pub heart_rate_valid: bool,
}

impl Spo2Estimate {
    fn invalid() -> Self {
        Self {
            spo2: 0.0,
            spo2_valid: false,
            heart_rate: 0.0,
            heart_rate_valid: false,
        }
    }
}

/// Estimate SpO2 and a secondary heart rate from one full window of paired
/// red/infrared samples taken `sample_rate_hz` apart.
///
/// Degenerate input (flat signal, zero baseline, too few detectable beats)
/// yields invalid flags, never a panic.
pub fn estimate(red: &[u32], ir: &[u32], sample_rate_hz: f64) -> Spo2Estimate {
    if red.len() != ir.len() || red.len() < 3 || sample_rate_hz <= 0.0 {
        return Spo2Estimate::invalid();
    }

    let red_f: Vec<f64> = red.iter().map(|&s| s as f64).collect();
    let ir_f: Vec<f64> = ir.iter().map(|&s| s as f64).collect();

    // 1. Smooth both channels to strip high-frequency noise
    let red_smooth = lowpass(&red_f, sample_rate_hz, SMOOTH_CUTOFF_HZ);
    let ir_smooth = lowpass(&ir_f, sample_rate_hz, SMOOTH_CUTOFF_HZ);

    // 2. AC/DC split per channel
    let (red_ac, red_dc) = ac_dc_components(&red_smooth, sample_rate_hz);
    let (ir_ac, ir_dc) = ac_dc_components(&ir_smooth, sample_rate_hz);

    // 3. Ratio of ratios -> SpO2
    let r = ratio_of_ratios(red_ac, red_dc, ir_ac, ir_dc);
    let (spo2, spo2_valid) = if r > 0.0 {
        ((110.0 - 25.0 * r).clamp(0.0, 100.0), true)
    } else {
        (0.0, false)
    };

    // 4. Secondary heart rate from infrared peak timing
    let peaks = find_systolic_peaks(&ir_smooth, sample_rate_hz);
    let heart_rate = median_rate(&peaks, sample_rate_hz);
    let heart_rate_valid = heart_rate > 0.0;

    Spo2Estimate {
        spo2,
        spo2_valid,
        heart_rate,
        heart_rate_valid,
    }
}

/// R = (AC_red/DC_red) / (AC_ir/DC_ir), or 0.0 when degenerate
pub fn ratio_of_ratios(red_ac: f64, red_dc: f64, ir_ac: f64, ir_dc: f64) -> f64 {
    if red_dc.abs() < 1e-12 || ir_dc.abs() < 1e-12 || ir_ac.abs() < 1e-12 {
        return 0.0;
    }
    (red_ac / red_dc) / (ir_ac / ir_dc)
}

/// DC is the window mean; AC is the RMS of the cardiac-band component over
/// the steady-state portion (a leading filter transient is skipped).
fn ac_dc_components(signal: &[f64], fs: f64) -> (f64, f64) {
    if signal.is_empty() {
        return (0.0, 0.0);
    }

    let dc: f64 = signal.iter().sum::<f64>() / signal.len() as f64;
    let band = cardiac_band(signal, dc, fs);

    // Skip the filter transient: 2 s or 10% of the window, whichever is less
    let skip = ((2.0 * fs) as usize).min(band.len() / 10);
    let steady = &band[skip..];
    if steady.is_empty() {
        return (0.0, dc);
    }

    let sum_sq: f64 = steady.iter().map(|&x| x * x).sum();
    let ac_rms = (sum_sq / steady.len() as f64).sqrt();
    (ac_rms, dc)
}

/// Systolic peak indices in the infrared waveform: local maxima in the
/// cardiac band above an adaptive threshold, separated by at least the
/// 240 BPM spacing floor.
fn find_systolic_peaks(signal: &[f64], fs: f64) -> Vec<usize> {
    if signal.len() < 3 {
        return Vec::new();
    }

    let mean: f64 = signal.iter().sum::<f64>() / signal.len() as f64;
    let band = cardiac_band(signal, mean, fs);
    if band.len() < 3 {
        return Vec::new();
    }

    // Threshold from the steady-state portion only (1 s transient skip)
    let skip = (fs as usize).min(band.len() / 4);
    let steady = &band[skip..];
    if steady.len() < 3 {
        return Vec::new();
    }
    let steady_mean: f64 = steady.iter().sum::<f64>() / steady.len() as f64;
    let steady_max = steady.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let threshold = steady_mean + 0.3 * (steady_max - steady_mean);

    let min_dist = (fs * 60.0 / MAX_RATE_BPM).max(1.0) as usize;

    let mut peaks: Vec<usize> = Vec::new();
    for i in (skip + 1)..band.len() - 1 {
        if band[i] > band[i - 1] && band[i] > band[i + 1] && band[i] > threshold {
            match peaks.last().copied() {
                Some(last) if i - last < min_dist => {
                    // Keep the taller of two peaks crowding the spacing floor
                    if band[i] > band[last] {
                        let n = peaks.len();
                        peaks[n - 1] = i;
                    }
                }
                _ => peaks.push(i),
            }
        }
    }
    peaks
}

/// Heart rate in BPM from the median inter-peak interval; 0.0 with fewer
/// than two peaks
fn median_rate(peaks: &[usize], fs: f64) -> f64 {
    if peaks.len() < 2 || fs <= 0.0 {
        return 0.0;
    }

    let mut intervals: Vec<f64> = peaks
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64 / fs)
        .collect();
    intervals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let median = if intervals.len() % 2 == 0 {
        (intervals[intervals.len() / 2 - 1] + intervals[intervals.len() / 2]) / 2.0
    } else {
        intervals[intervals.len() / 2]
    };

    if median > 0.0 {
        60.0 / median
    } else {
        0.0
    }
}

/// Zero-mean the signal and bandpass it to the cardiac band
fn cardiac_band(signal: &[f64], mean: f64, fs: f64) -> Vec<f64> {
    let zero_mean: Vec<f64> = signal.iter().map(|&x| x - mean).collect();
    let low = lowpass(&zero_mean, fs, CARDIAC_HIGH_HZ);
    highpass(&low, fs, CARDIAC_LOW_HZ)
}

/// First-order IIR lowpass: y[n] = a*x[n] + (1-a)*y[n-1]
fn lowpass(signal: &[f64], fs: f64, cutoff_hz: f64) -> Vec<f64> {
    if signal.is_empty() || fs <= 0.0 || cutoff_hz <= 0.0 {
        return signal.to_vec();
    }

    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let alpha = dt / (rc + dt);

    let mut out = Vec::with_capacity(signal.len());
    out.push(signal[0]);
    for i in 1..signal.len() {
        let y = alpha * signal[i] + (1.0 - alpha) * out[i - 1];
        out.push(y);
    }
    out
}

/// First-order IIR highpass: y[n] = a*(y[n-1] + x[n] - x[n-1])
fn highpass(signal: &[f64], fs: f64, cutoff_hz: f64) -> Vec<f64> {
    if signal.is_empty() || fs <= 0.0 || cutoff_hz <= 0.0 {
        return signal.to_vec();
    }

    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let alpha = rc / (rc + dt);

    let mut out = Vec::with_capacity(signal.len());
    out.push(signal[0]);
    for i in 1..signal.len() {
        let y = alpha * (out[i - 1] + signal[i] - signal[i - 1]);
        out.push(y);
    }
    out
}
