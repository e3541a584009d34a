//! Vigil Core Library
//!
//! The firmware core of a wrist-worn vital-sign monitor: pulse oximetry,
//! fall detection, and cellular/WiFi emergency escalation.
//!
//! ## Modules
//!
//! - `types` - Core data structures (Reading, UploadRecord, OperatorCommand)
//! - `identity` - Stable device identifier derived from hardware
//! - `hal` - Sensor, modem, WiFi and clock traits the core is written against
//! - `vitals` - Beat-to-beat heart rate and windowed SpO2 estimation
//! - `motion` - IMU sampling and magnitude extraction
//! - `detect` - Threshold classifier and two-stage fall detector
//! - `modem` - AT-command driver for the cellular module (SMS, calls, HTTP)
//! - `escalation` - Emergency state machine (notify, call, stand down)
//! - `transport` - WiFi-first upload path with modem fallback and offline queue
//! - `monitor` - The control loop tying every subsystem together
//! - `sim` - Bench implementations of the hardware traits

pub mod types;
pub mod identity;
pub mod hal;
pub mod vitals;
pub mod motion;
pub mod detect;
pub mod modem;
pub mod escalation;
pub mod transport;
pub mod monitor;
pub mod sim;

pub use types::*;
pub use identity::DeviceIdentity;
pub use monitor::{Monitor, MonitorConfig};
