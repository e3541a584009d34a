//! Anomaly detection over the latest vitals and motion data.
//!
//! Two independent detectors feed the escalation machine: a threshold
//! classifier over the vital signs, and the two-stage fall detector in
//! [`fall`].

pub mod fall;

use std::fmt;

use crate::vitals::VitalSigns;

/// Thresholds separating normal vitals from reportable ones
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    /// BPM above which the heart rate is critical
    pub high_heart_rate: f64,
    /// BPM below which the heart rate is critical
    pub low_heart_rate: f64,
    /// Percent below which SpO2 is critical
    pub low_spo2: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            high_heart_rate: 140.0,
            low_heart_rate: 40.0,
            low_spo2: 90.0,
        }
    }
}

/// A condition severe enough to hand to the escalation machine
#[derive(Debug, Clone, PartialEq)]
pub enum Anomaly {
    /// Vitals crossed a configured threshold
    CriticalVitals { heart_rate: f64, spo2: f64 },
    /// Impact followed by stillness
    FallConfirmed { impact_accel: f64, impact_gyro: f64 },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::CriticalVitals { heart_rate, spo2 } => write!(
                f,
                "CRITICAL VITALS: HR={:.0} BPM, SpO2={:.0}%",
                heart_rate, spo2
            ),
            Anomaly::FallConfirmed {
                impact_accel,
                impact_gyro,
            } => write!(
                f,
                "FALL DETECTED: impact {:.1} m/s^2, rotation {:.1} deg/s",
                impact_accel, impact_gyro
            ),
        }
    }
}

/// Threshold classifier, gated on sensor contact and a warm beat ring.
/// A thin ring means the reported rate is not yet trustworthy enough to
/// alarm on.
#[derive(Debug)]
pub struct VitalsClassifier {
    config: ThresholdConfig,
    min_valid_beats: usize,
}

impl VitalsClassifier {
    pub fn new(config: ThresholdConfig, min_valid_beats: usize) -> Self {
        Self {
            config,
            min_valid_beats,
        }
    }

    /// Evaluate the latest vitals. SpO2 of 0.0 means no reading yet and is
    /// never treated as hypoxia.
    pub fn evaluate(
        &self,
        signs: &VitalSigns,
        contact: bool,
        valid_beats: usize,
    ) -> Option<Anomaly> {
        if !contact || valid_beats < self.min_valid_beats {
            return None;
        }

        let rate_critical = signs.heart_rate > self.config.high_heart_rate
            || signs.heart_rate < self.config.low_heart_rate;
        let spo2_critical = signs.spo2 > 0.0 && signs.spo2 < self.config.low_spo2;

        if rate_critical || spo2_critical {
            return Some(Anomaly::CriticalVitals {
                heart_rate: signs.heart_rate,
                spo2: signs.spo2,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> VitalsClassifier {
        VitalsClassifier::new(ThresholdConfig::default(), 4)
    }

    #[test]
    fn test_high_rate_crosses_threshold() {
        let signs = VitalSigns {
            heart_rate: 155.0,
            spo2: 96.0,
        };
        let anomaly = classifier().evaluate(&signs, true, 6);
        match anomaly {
            Some(Anomaly::CriticalVitals { heart_rate, spo2 }) => {
                assert_eq!(heart_rate, 155.0);
                assert_eq!(spo2, 96.0);
            }
            other => panic!("expected critical vitals, got {:?}", other),
        }
    }

    #[test]
    fn test_low_spo2_crosses_threshold() {
        let signs = VitalSigns {
            heart_rate: 72.0,
            spo2: 85.0,
        };
        assert!(classifier().evaluate(&signs, true, 6).is_some());
    }

    #[test]
    fn test_missing_spo2_is_not_hypoxia() {
        let signs = VitalSigns {
            heart_rate: 72.0,
            spo2: 0.0,
        };
        assert!(classifier().evaluate(&signs, true, 6).is_none());
    }

    #[test]
    fn test_normal_vitals_pass() {
        let signs = VitalSigns {
            heart_rate: 72.0,
            spo2: 97.0,
        };
        assert!(classifier().evaluate(&signs, true, 6).is_none());
    }

    #[test]
    fn test_gated_without_contact_or_warm_ring() {
        let signs = VitalSigns {
            heart_rate: 155.0,
            spo2: 96.0,
        };
        assert!(
            classifier().evaluate(&signs, false, 6).is_none(),
            "no contact, no alarm"
        );
        assert!(
            classifier().evaluate(&signs, true, 3).is_none(),
            "thin ring, no alarm"
        );
    }

    #[test]
    fn test_display_carries_the_numbers() {
        let text = Anomaly::CriticalVitals {
            heart_rate: 155.0,
            spo2: 96.0,
        }
        .to_string();
        assert!(text.contains("CRITICAL VITALS"));
        assert!(text.contains("155"));

        let text = Anomaly::FallConfirmed {
            impact_accel: 31.2,
            impact_gyro: 250.0,
        }
        .to_string();
        assert!(text.contains("FALL DETECTED"));
        assert!(text.contains("31.2"));
    }
}
