//! Vital-sign acquisition pipeline.
//!
//! Each control-loop iteration produces the best available heart-rate and
//! SpO2 estimate, or zeros when nothing valid exists. Heart rate comes from
//! two sources: direct beat-to-beat timing (reacts within one beat) and the
//! windowed SpO2 routine's secondary estimate (more robust at rest, updates
//! on the window cadence and only stands in while the beat ring is thin).
//! Contact gating rules everything: no skin contact, no vitals, and stale
//! data never survives a contact gap.

pub mod spo2;

use std::collections::VecDeque;
use tracing::{debug, trace, warn};

use crate::hal::{Clock, PulseSample, PulseSensor};

/// Deployment parameters of the acquisition pipeline
#[derive(Debug, Clone)]
pub struct VitalsConfig {
    /// Raw infrared intensity above which the sensor is in contact
    pub contact_ir_threshold: u32,
    /// Capacity of the accepted-rate ring
    pub beat_history_len: usize,
    /// Valid entries required before the direct mean stands on its own
    pub min_valid_beats: usize,
    /// Plausible instantaneous rate band in BPM; outside is sensor noise
    pub min_rate_bpm: f64,
    pub max_rate_bpm: f64,
    /// Accepted SpO2 band in percent
    pub min_spo2: f64,
    pub max_spo2: f64,
    /// Gap between SpO2 window starts
    pub spo2_interval_ms: u64,
    /// Paired-sample spacing while a window is filling
    pub spo2_sample_interval_ms: u64,
    /// Paired samples per SpO2 window
    pub spo2_window_len: usize,
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            contact_ir_threshold: 50_000,
            beat_history_len: 8,
            min_valid_beats: 4,
            min_rate_bpm: 40.0,
            max_rate_bpm: 180.0,
            min_spo2: 70.0,
            max_spo2: 100.0,
            spo2_interval_ms: 5_000,
            spo2_sample_interval_ms: 10,
            spo2_window_len: 400,
        }
    }
}

/// Best-available vitals for one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VitalSigns {
    /// BPM, 0.0 when unavailable
    pub heart_rate: f64,
    /// Percent, 0.0 when unavailable
    pub spo2: f64,
}

/// Fixed-capacity ring of accepted beat-to-beat rates.
/// Oldest entry is overwritten once full.
#[derive(Debug)]
struct BeatHistory {
    rates: VecDeque<f64>,
    capacity: usize,
}

impl BeatHistory {
    fn new(capacity: usize) -> Self {
        Self {
            rates: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, rate: f64) {
        if self.rates.len() == self.capacity {
            self.rates.pop_front();
        }
        self.rates.push_back(rate);
    }

    fn valid_count(&self) -> usize {
        self.rates.len()
    }

    fn mean(&self) -> f64 {
        if self.rates.is_empty() {
            return 0.0;
        }
        self.rates.iter().sum::<f64>() / self.rates.len() as f64
    }

    fn clear(&mut self) {
        self.rates.clear();
    }
}

/// Two parallel red/infrared buffers with a shared fill cursor.
/// Filled incrementally across loop iterations, consumed atomically once
/// full, then reset.
#[derive(Debug)]
struct Spo2Window {
    red: Vec<u32>,
    ir: Vec<u32>,
    len: usize,
}

impl Spo2Window {
    fn new(len: usize) -> Self {
        Self {
            red: Vec::with_capacity(len),
            ir: Vec::with_capacity(len),
            len,
        }
    }

    fn push(&mut self, sample: PulseSample) {
        if self.red.len() < self.len {
            self.red.push(sample.red);
            self.ir.push(sample.ir);
        }
    }

    fn is_full(&self) -> bool {
        self.red.len() == self.len
    }

    fn fill(&self) -> usize {
        self.red.len()
    }

    fn reset(&mut self) {
        self.red.clear();
        self.ir.clear();
    }
}

/// The acquisition pipeline. Owns `BeatHistory` and `Spo2Window`
/// exclusively; nothing else touches them.
#[derive(Debug)]
pub struct VitalsPipeline {
    config: VitalsConfig,
    beats: BeatHistory,
    window: Spo2Window,
    contact: bool,
    last_beat_ms: Option<u64>,
    window_active: bool,
    window_started_ms: u64,
    last_sample_ms: u64,
    cached_spo2: f64,
    fallback_rate: Option<f64>,
}

impl VitalsPipeline {
    pub fn new(config: VitalsConfig) -> Self {
        let beats = BeatHistory::new(config.beat_history_len);
        let window = Spo2Window::new(config.spo2_window_len);
        Self {
            config,
            beats,
            window,
            contact: false,
            last_beat_ms: None,
            window_active: false,
            window_started_ms: 0,
            last_sample_ms: 0,
            cached_spo2: 0.0,
            fallback_rate: None,
        }
    }

    /// One pipeline pass. Never blocks: the SpO2 window takes at most one
    /// paired sample per call.
    pub fn step(&mut self, clock: &impl Clock, sensor: &mut impl PulseSensor) -> VitalSigns {
        let now = clock.now_ms();

        // 1. Contact gating: everything downstream requires skin contact
        let ir = match sensor.ir_level() {
            Ok(v) => v,
            Err(e) => {
                warn!("Pulse sensor read failed: {}", e);
                self.drop_contact();
                return VitalSigns::default();
            }
        };
        if ir < self.config.contact_ir_threshold {
            if self.contact {
                debug!("Sensor contact lost, clearing beat history");
            }
            self.drop_contact();
            return VitalSigns::default();
        }
        if !self.contact {
            debug!("Sensor contact established");
            self.contact = true;
        }

        // 2. Beat detection -> instantaneous rate
        match sensor.check_beat() {
            Ok(true) => {
                if let Some(last) = self.last_beat_ms {
                    let delta = now.saturating_sub(last);
                    if delta > 0 {
                        let rate = 60_000.0 / delta as f64;
                        if rate >= self.config.min_rate_bpm && rate <= self.config.max_rate_bpm {
                            self.beats.push(rate);
                            trace!("Beat accepted: {:.0} BPM", rate);
                        } else {
                            trace!("Beat rejected as noise: {:.0} BPM", rate);
                        }
                    }
                }
                self.last_beat_ms = Some(now);
            }
            Ok(false) => {}
            Err(e) => warn!("Beat check failed: {}", e),
        }

        // 3. SpO2 window cadence (incremental, non-blocking)
        if self.window_active {
            if now.saturating_sub(self.last_sample_ms) >= self.config.spo2_sample_interval_ms {
                match sensor.read_sample() {
                    Ok(sample) => {
                        self.window.push(sample);
                        self.last_sample_ms = now;
                        if self.window.is_full() {
                            self.finish_window();
                        }
                    }
                    Err(e) => {
                        warn!("SpO2 sample read failed, abandoning window: {}", e);
                        self.window.reset();
                        self.window_active = false;
                    }
                }
            }
        } else if now.saturating_sub(self.window_started_ms) >= self.config.spo2_interval_ms {
            self.window_active = true;
            self.window_started_ms = now;
        }

        VitalSigns {
            heart_rate: self.reported_rate(),
            spo2: self.cached_spo2,
        }
    }

    pub fn has_contact(&self) -> bool {
        self.contact
    }

    pub fn valid_beats(&self) -> usize {
        self.beats.valid_count()
    }

    /// Consume the full window through the estimation routine and apply the
    /// acceptance bands.
    fn finish_window(&mut self) {
        let fs = 1_000.0 / self.config.spo2_sample_interval_ms as f64;
        let est = spo2::estimate(&self.window.red, &self.window.ir, fs);

        if est.spo2_valid && est.spo2 >= self.config.min_spo2 && est.spo2 <= self.config.max_spo2 {
            self.cached_spo2 = est.spo2;
            debug!("SpO2 window complete: {:.1}%", est.spo2);
        } else {
            debug!(
                "SpO2 window rejected (value {:.1}, valid {})",
                est.spo2, est.spo2_valid
            );
        }

        if est.heart_rate_valid
            && est.heart_rate >= self.config.min_rate_bpm
            && est.heart_rate <= self.config.max_rate_bpm
        {
            self.fallback_rate = Some(est.heart_rate);
        }

        self.window.reset();
        self.window_active = false;
    }

    /// Direct mean when the ring is warm; the windowed secondary estimate
    /// while it is thin; whatever exists otherwise.
    fn reported_rate(&self) -> f64 {
        let n = self.beats.valid_count();
        if n >= self.config.min_valid_beats {
            return self.beats.mean();
        }
        if let Some(fallback) = self.fallback_rate {
            return fallback;
        }
        if n > 0 {
            self.beats.mean()
        } else {
            0.0
        }
    }

    fn drop_contact(&mut self) {
        self.contact = false;
        self.beats.clear();
        self.last_beat_ms = None;
        self.cached_spo2 = 0.0;
        self.fallback_rate = None;
        self.window.reset();
        self.window_active = false;
    }
}
