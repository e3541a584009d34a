//! Motion sampling.
//!
//! Thin layer over the inertial sensor: one frame per loop iteration with
//! the two magnitudes the detectors key on precomputed. A failed read
//! degrades to a zero snapshot rather than stalling the loop.

use tracing::warn;

use crate::hal::MotionSensor;
use crate::types::MotionFrame;

/// One inertial frame with its derived magnitudes
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionSnapshot {
    pub frame: MotionFrame,
    /// Acceleration vector magnitude in m/s^2
    pub accel_magnitude: f64,
    /// Angular velocity vector magnitude in deg/s
    pub gyro_magnitude: f64,
}

impl MotionSnapshot {
    pub fn from_frame(frame: MotionFrame) -> Self {
        Self {
            accel_magnitude: frame.accel.magnitude(),
            gyro_magnitude: frame.gyro.magnitude(),
            frame,
        }
    }
}

/// Read the next inertial frame, zeroed when the sensor fails
pub fn sample(sensor: &mut impl MotionSensor) -> MotionSnapshot {
    match sensor.read() {
        Ok(frame) => MotionSnapshot::from_frame(frame),
        Err(e) => {
            warn!("Motion sensor read failed: {}", e);
            MotionSnapshot::default()
        }
    }
}
