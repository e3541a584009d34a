//! Core data types for the Vigil monitor.

use serde::{Deserialize, Serialize};

/// Triaxial vector from an inertial sensor axis group
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt()
    }
}

/// One raw inertial sample: acceleration in m/s², angular rate in deg/s
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionFrame {
    pub accel: Vector3,
    pub gyro: Vector3,
}

/// One vital-sign + motion sample, produced once per control-loop iteration.
///
/// Immutable once constructed. Heart rate and SpO2 are `0.0` when no valid
/// measurement exists (no sensor contact, insufficient samples). The struct
/// serializes directly into the ingestion payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: String,
    /// Heart rate in BPM, 0.0 when unavailable
    pub heart_rate: f64,
    /// Oxygen saturation in percent, 0.0 when unavailable
    pub spo2: f64,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    /// Fixed deployment coordinates (the device carries no GNSS receiver)
    pub gps_lat: f64,
    pub gps_long: f64,
}

impl Reading {
    pub fn new(
        device_id: &str,
        heart_rate: f64,
        spo2: f64,
        frame: &MotionFrame,
        gps_lat: f64,
        gps_long: f64,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            heart_rate,
            spo2,
            accel_x: frame.accel.x,
            accel_y: frame.accel.y,
            accel_z: frame.accel.z,
            gyro_x: frame.gyro.x,
            gyro_y: frame.gyro.y,
            gyro_z: frame.gyro.z,
            timestamp: current_time_ms(),
            gps_lat,
            gps_long,
        }
    }
}

/// Why a record is being uploaded. Determines the optional wire flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// Scheduled periodic upload
    Periodic,
    /// Immediate upload dispatched when escalation triggers
    Emergency { manual: bool },
    /// Replay of a previously failed upload from the offline queue
    Queued,
}

/// Wire envelope: the reading plus the optional escalation/retry flags.
///
/// Flags are added at serialization time only; the underlying `Reading`
/// is never mutated after construction.
#[derive(Debug, Serialize)]
pub struct UploadRecord<'a> {
    #[serde(flatten)]
    pub reading: &'a Reading,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_trigger: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<bool>,
}

impl<'a> UploadRecord<'a> {
    pub fn new(reading: &'a Reading, kind: UploadKind) -> Self {
        let (emergency, manual_trigger, queued) = match kind {
            UploadKind::Periodic => (None, None, None),
            UploadKind::Emergency { manual } => (Some(true), manual.then_some(true), None),
            UploadKind::Queued => (None, None, Some(true)),
        };
        Self {
            reading,
            emergency,
            manual_trigger,
            queued,
        }
    }
}

/// Textual operator command for bench testing (stdin or equivalent)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Force an emergency escalation (equivalent to the long-press)
    Trigger,
    /// Re-arm the escalation state machine
    Reset,
    /// Log a one-line state summary
    Status,
}

impl OperatorCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "trigger" => Some(Self::Trigger),
            "reset" => Some(Self::Reset),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

/// Current Unix time in milliseconds
pub fn current_time_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude() {
        let v = Vector3::new(3.0, 4.0, 0.0);
        assert!((v.magnitude() - 5.0).abs() < 1e-9);

        let rest = Vector3::new(0.0, 0.0, 9.8);
        assert!((rest.magnitude() - 9.8).abs() < 1e-9, "gravity-only magnitude");
    }

    fn sample_reading() -> Reading {
        let frame = MotionFrame {
            accel: Vector3::new(0.1, 0.2, 9.8),
            gyro: Vector3::new(1.0, 2.0, 3.0),
        };
        Reading::new("vigil-abc123", 72.0, 98.0, &frame, 6.4541, 3.3947)
    }

    #[test]
    fn test_reading_serializes_flat_axes() {
        let reading = sample_reading();
        let json = serde_json::to_value(&reading).unwrap();

        assert_eq!(json["device_id"], "vigil-abc123");
        assert_eq!(json["heart_rate"], 72.0);
        assert_eq!(json["accel_z"], 9.8);
        assert_eq!(json["gyro_y"], 2.0);
        assert!(json.get("accel").is_none(), "axes must be flat fields");
    }

    #[test]
    fn test_periodic_record_has_no_flags() {
        let reading = sample_reading();
        let record = UploadRecord::new(&reading, UploadKind::Periodic);
        let json = serde_json::to_value(&record).unwrap();

        assert!(json.get("emergency").is_none());
        assert!(json.get("manual_trigger").is_none());
        assert!(json.get("queued").is_none());
        assert_eq!(json["spo2"], 98.0, "flattened reading fields present");
    }

    #[test]
    fn test_emergency_record_flags() {
        let reading = sample_reading();

        let auto = UploadRecord::new(&reading, UploadKind::Emergency { manual: false });
        let json = serde_json::to_value(&auto).unwrap();
        assert_eq!(json["emergency"], true);
        assert!(json.get("manual_trigger").is_none(), "auto trigger is not manual");

        let manual = UploadRecord::new(&reading, UploadKind::Emergency { manual: true });
        let json = serde_json::to_value(&manual).unwrap();
        assert_eq!(json["emergency"], true);
        assert_eq!(json["manual_trigger"], true);
    }

    #[test]
    fn test_queued_record_flag() {
        let reading = sample_reading();
        let record = UploadRecord::new(&reading, UploadKind::Queued);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["queued"], true);
        assert!(json.get("emergency").is_none());
    }

    #[test]
    fn test_operator_command_parse() {
        assert_eq!(OperatorCommand::parse("trigger"), Some(OperatorCommand::Trigger));
        assert_eq!(OperatorCommand::parse("  RESET \n"), Some(OperatorCommand::Reset));
        assert_eq!(OperatorCommand::parse("status"), Some(OperatorCommand::Status));
        assert_eq!(OperatorCommand::parse("bogus"), None);
    }
}
