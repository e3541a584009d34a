//! Hardware abstraction seams.
//!
//! The control logic never touches a driver directly: the pulse-oximetry
//! chip, the inertial sensor, the cellular modem UART, and the WiFi stack
//! all sit behind the narrow traits defined here, so detectors, escalation,
//! and transport are unit-testable against fakes with injected clocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::types::MotionFrame;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Sensor not detected on the bus")]
    NotDetected,
    #[error("Sensor read failed: {0}")]
    ReadFailed(String),
}

#[derive(Error, Debug)]
pub enum ModemError {
    #[error("Modem response timeout waiting for '{expected}'")]
    Timeout { expected: String },
    #[error("Modem command failed: {response}")]
    CommandFailed { response: String },
    #[error("Modem link I/O error: {0}")]
    Io(String),
    #[error("Unexpected modem response: {0}")]
    Unexpected(String),
}

#[derive(Error, Debug)]
pub enum WifiError {
    #[error("WiFi not associated")]
    NotAssociated,
    #[error("HTTP request failed: {0}")]
    Request(String),
}

/// Monotonic millisecond tick source for all control timing.
/// Wall-clock time is kept separate (reading timestamps only).
pub trait Clock {
    /// Milliseconds since boot
    fn now_ms(&self) -> u64;
}

/// Production clock backed by `Instant`
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock for tests and scripted bench scenarios.
/// Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    now: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(start_ms)) }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::Relaxed);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// One paired sample from the optical sensor's two LED channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseSample {
    pub red: u32,
    pub ir: u32,
}

/// Optical pulse-oximetry front end.
///
/// `check_beat` is the pluggable beat detector: it answers "was a beat
/// observed since the last poll" and the pipeline derives rates from the
/// poll timestamps, so the trait carries no timing of its own.
pub trait PulseSensor {
    fn init(&mut self) -> Result<(), SensorError>;
    /// Raw infrared intensity, used for contact (finger-present) gating
    fn ir_level(&mut self) -> Result<u32, SensorError>;
    /// True when a beat was observed since the last poll
    fn check_beat(&mut self) -> Result<bool, SensorError>;
    /// One paired red/infrared sample for the SpO2 window
    fn read_sample(&mut self) -> Result<PulseSample, SensorError>;
}

/// Triaxial inertial sensor (accelerometer in m/s², gyro in deg/s)
pub trait MotionSensor {
    fn init(&mut self) -> Result<(), SensorError>;
    fn read(&mut self) -> Result<MotionFrame, SensorError>;
}

/// The SOS button. Raw level only; hold timing and debouncing live in the
/// control loop's tracker.
pub trait ButtonInput {
    fn is_pressed(&mut self) -> bool;
}

/// Raw command interface of the cellular modem.
///
/// Implementations own line termination and response framing; the AT
/// choreography (SMS, voice, bearer, HTTP session) lives in
/// [`crate::modem::CellularModem`] on top of these three primitives.
#[allow(async_fn_in_trait)]
pub trait ModemLink {
    /// Send one command line
    async fn send_line(&mut self, line: &str) -> Result<(), ModemError>;
    /// Write raw bytes with no terminator (payload streaming after a prompt)
    async fn write_raw(&mut self, data: &[u8]) -> Result<(), ModemError>;
    /// Collect response text until `token` appears (returns everything read),
    /// the modem reports `ERROR` (-> `CommandFailed`), or the deadline passes
    /// (-> `Timeout`).
    async fn wait_for(&mut self, token: &str, timeout: Duration) -> Result<String, ModemError>;
}

/// Packet-data network link used for the primary upload path
#[allow(async_fn_in_trait)]
pub trait WifiLink {
    /// Cheap association check, polled every loop iteration
    async fn is_connected(&mut self) -> bool;
    /// Attempt re-association; `Ok` means the link is usable again
    async fn reconnect(&mut self) -> Result<(), WifiError>;
    /// POST a JSON body; returns the HTTP status of any received response
    async fn post_json(
        &mut self,
        url: &str,
        body: &str,
        timeout: Duration,
    ) -> Result<u16, WifiError>;
}
