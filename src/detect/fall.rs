//! Two-stage fall detection.
//!
//! Stage one watches for the impact signature: simultaneous acceleration
//! and rotation spikes. Stage two confirms the fall by checking for
//! post-impact stillness once a settling delay has passed. A candidate
//! that cannot be resolved within its lifetime is dropped, so a stale
//! impact can never pair with unrelated stillness much later.

use tracing::{debug, info};

use super::Anomaly;

#[derive(Debug, Clone)]
pub struct FallConfig {
    /// Acceleration magnitude marking an impact, m/s^2
    pub impact_accel: f64,
    /// Rotation magnitude marking an impact, deg/s
    pub impact_gyro: f64,
    /// Acceleration magnitude below which the wearer counts as still, m/s^2
    pub stillness_accel: f64,
    /// Settling time between the impact and the stillness check
    pub confirm_delay_ms: u64,
    /// Candidate lifetime; unresolved candidates are dropped
    pub timeout_ms: u64,
}

impl Default for FallConfig {
    fn default() -> Self {
        Self {
            impact_accel: 25.0,
            impact_gyro: 200.0,
            stillness_accel: 12.0,
            confirm_delay_ms: 300,
            timeout_ms: 1_000,
        }
    }
}

/// An impact awaiting its stillness check
#[derive(Debug, Clone, Copy)]
struct FallCandidate {
    detected_at_ms: u64,
    impact_accel: f64,
    impact_gyro: f64,
}

#[derive(Debug)]
pub struct FallDetector {
    config: FallConfig,
    candidate: Option<FallCandidate>,
}

impl FallDetector {
    pub fn new(config: FallConfig) -> Self {
        Self {
            config,
            candidate: None,
        }
    }

    /// Advance the detector one inertial frame. Returns a confirmed fall at
    /// most once per impact. While a candidate is pending, further impact
    /// frames do not restart its clock.
    pub fn update(&mut self, now_ms: u64, accel_mag: f64, gyro_mag: f64) -> Option<Anomaly> {
        if let Some(candidate) = self.candidate {
            let age = now_ms.saturating_sub(candidate.detected_at_ms);
            if age >= self.config.timeout_ms {
                debug!("Fall candidate timed out unresolved");
                self.candidate = None;
            } else if age >= self.config.confirm_delay_ms {
                // First frame past the settling delay resolves the candidate
                self.candidate = None;
                if accel_mag < self.config.stillness_accel {
                    info!(
                        "Fall confirmed: impact {:.1} m/s^2 then stillness",
                        candidate.impact_accel
                    );
                    return Some(Anomaly::FallConfirmed {
                        impact_accel: candidate.impact_accel,
                        impact_gyro: candidate.impact_gyro,
                    });
                }
                debug!(
                    "Fall candidate discarded, wearer still moving ({:.1} m/s^2)",
                    accel_mag
                );
            }
        } else if accel_mag > self.config.impact_accel && gyro_mag > self.config.impact_gyro {
            debug!(
                "Impact signature: accel {:.1} m/s^2, gyro {:.1} deg/s",
                accel_mag, gyro_mag
            );
            self.candidate = Some(FallCandidate {
                detected_at_ms: now_ms,
                impact_accel: accel_mag,
                impact_gyro: gyro_mag,
            });
        }
        None
    }

    pub fn pending(&self) -> bool {
        self.candidate.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> FallDetector {
        FallDetector::new(FallConfig::default())
    }

    #[test]
    fn test_impact_then_stillness_confirms() {
        let mut det = detector();
        assert!(det.update(0, 30.0, 250.0).is_none(), "impact alone must not alarm");
        assert!(det.pending());

        match det.update(350, 5.0, 10.0) {
            Some(Anomaly::FallConfirmed {
                impact_accel,
                impact_gyro,
            }) => {
                assert_eq!(impact_accel, 30.0);
                assert_eq!(impact_gyro, 250.0);
            }
            other => panic!("expected confirmed fall, got {:?}", other),
        }
        assert!(!det.pending());
    }

    #[test]
    fn test_impact_then_movement_discards() {
        let mut det = detector();
        det.update(0, 30.0, 250.0);
        assert!(det.update(350, 15.0, 40.0).is_none());
        assert!(!det.pending(), "moving wearer clears the candidate");
    }

    #[test]
    fn test_single_axis_spike_is_not_an_impact() {
        let mut det = detector();
        assert!(det.update(0, 30.0, 50.0).is_none());
        assert!(!det.pending(), "accel spike without rotation is a bump, not a fall");
        assert!(det.update(10, 10.0, 250.0).is_none());
        assert!(!det.pending());
    }

    #[test]
    fn test_settling_window_defers_resolution() {
        let mut det = detector();
        det.update(0, 30.0, 250.0);
        assert!(det.update(100, 5.0, 10.0).is_none());
        assert!(det.pending(), "stillness before the delay must not confirm");
    }

    #[test]
    fn test_stale_candidate_times_out() {
        let mut det = detector();
        det.update(0, 30.0, 250.0);
        assert!(
            det.update(1_200, 3.0, 5.0).is_none(),
            "stillness after the lifetime must not confirm"
        );
        assert!(!det.pending());
    }

    #[test]
    fn test_repeat_impact_keeps_original_clock() {
        let mut det = detector();
        det.update(0, 30.0, 250.0);
        // Tumbling produces more impact frames; the first one anchors timing
        det.update(200, 28.0, 230.0);
        match det.update(350, 5.0, 10.0) {
            Some(Anomaly::FallConfirmed { impact_accel, .. }) => assert_eq!(impact_accel, 30.0),
            other => panic!("expected confirmed fall from the first impact, got {:?}", other),
        }
    }
}
