//! Emergency escalation state machine.
//!
//! One detected anomaly becomes at most one responder notification plus a
//! series of call attempts. The machine has three phases: `Idle` (armed),
//! `Active` (escalating: notified, calling on the retry interval) and
//! `Handled` (a responder engaged; monitoring continues but nothing
//! re-alerts until an explicit re-arm). The retry clock runs from dial
//! time, and every call attempt watches a bounded window for either the
//! responder answering or an inbound acknowledgment message.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::hal::{Clock, ModemLink};
use crate::modem::CellularModem;

#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Phone number notified and called on escalation
    pub responder_number: String,
    /// Spacing between call attempts, measured from dial time
    pub call_retry_interval_ms: u64,
    /// How long one call attempt watches for an answer
    pub call_monitor_window_ms: u64,
    /// Spacing of answer/acknowledgment polls inside the window
    pub call_poll_interval_ms: u64,
    /// Inbound keyword that stops escalation
    pub ack_keyword: String,
    /// Inbound keyword that re-arms the device
    pub resume_keyword: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            responder_number: String::new(),
            call_retry_interval_ms: 30_000,
            call_monitor_window_ms: 25_000,
            call_poll_interval_ms: 1_000,
            ack_keyword: "ACK".to_string(),
            resume_keyword: "RESUME".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyPhase {
    /// Armed, nothing in progress
    Idle,
    /// Escalating: responder notified, call attempts running
    Active,
    /// A responder engaged; no re-alerting until re-armed
    Handled,
}

#[derive(Debug, Clone)]
struct EmergencyState {
    phase: EmergencyPhase,
    /// Dial time of the most recent call attempt
    last_call_ms: Option<u64>,
    cause: String,
}

impl Default for EmergencyState {
    fn default() -> Self {
        Self {
            phase: EmergencyPhase::Idle,
            last_call_ms: None,
            cause: String::new(),
        }
    }
}

pub struct Escalation {
    config: EscalationConfig,
    device_id: String,
    gps_lat: f64,
    gps_long: f64,
    state: EmergencyState,
}

impl Escalation {
    pub fn new(config: EscalationConfig, device_id: &str, gps_lat: f64, gps_long: f64) -> Self {
        Self {
            config,
            device_id: device_id.to_string(),
            gps_lat,
            gps_long,
            state: EmergencyState::default(),
        }
    }

    pub fn phase(&self) -> EmergencyPhase {
        self.state.phase
    }

    pub fn cause(&self) -> &str {
        &self.state.cause
    }

    /// Begin escalating for `cause`. Returns true when a new escalation
    /// actually started; while one is active or handled, repeat anomalies
    /// are suppressed so the responder is alerted exactly once per episode.
    pub async fn trigger<M: ModemLink>(
        &mut self,
        cause: &str,
        modem: &mut CellularModem<M>,
    ) -> bool {
        if self.state.phase != EmergencyPhase::Idle {
            debug!(
                "Escalation already {:?}, suppressing trigger: {}",
                self.state.phase, cause
            );
            return false;
        }

        warn!("🚨 EMERGENCY: {}", cause);
        self.state.phase = EmergencyPhase::Active;
        self.state.cause = cause.to_string();
        // First call goes out on the next machine step
        self.state.last_call_ms = None;

        let message = format!(
            "VIGIL ALERT [{}]: {} | pos ({:.5}, {:.5})",
            self.device_id, cause, self.gps_lat, self.gps_long
        );
        // Notification and call are independent escalation actions; a
        // failed send never blocks dialing
        if let Err(e) = modem
            .send_sms(&self.config.responder_number, &message)
            .await
        {
            warn!("Notification SMS failed: {}", e);
        }
        true
    }

    /// Manual trigger: a deliberate SOS overrides any prior state and
    /// escalates fresh
    pub async fn trigger_manual<M: ModemLink>(&mut self, modem: &mut CellularModem<M>) -> bool {
        if self.state.phase != EmergencyPhase::Idle {
            info!("Manual trigger overrides {:?} state", self.state.phase);
            self.reset();
        }
        self.trigger("MANUAL SOS", modem).await
    }

    /// One machine step: place a call attempt if one is due
    pub async fn step<M: ModemLink>(&mut self, modem: &mut CellularModem<M>, clock: &impl Clock) {
        if self.state.phase != EmergencyPhase::Active {
            return;
        }
        let now = clock.now_ms();
        let due = match self.state.last_call_ms {
            None => true,
            Some(dialed) => now.saturating_sub(dialed) >= self.config.call_retry_interval_ms,
        };
        if due {
            self.attempt_call(modem, now).await;
        }
    }

    /// Dial the responder and watch a bounded window for resolution. The
    /// wait polls, so an inbound acknowledgment cancels the call at the
    /// next poll rather than after the full window.
    async fn attempt_call<M: ModemLink>(&mut self, modem: &mut CellularModem<M>, now: u64) {
        self.state.last_call_ms = Some(now);
        info!("Calling responder {}", self.config.responder_number);
        if let Err(e) = modem.dial(&self.config.responder_number).await {
            warn!("Dial failed: {}", e);
            return;
        }

        let polls =
            (self.config.call_monitor_window_ms / self.config.call_poll_interval_ms).max(1);
        for _ in 0..polls {
            sleep(Duration::from_millis(self.config.call_poll_interval_ms)).await;

            self.poll_commands(modem).await;
            if self.state.phase != EmergencyPhase::Active {
                self.hangup_quietly(modem).await;
                return;
            }

            match modem.call_answered().await {
                Ok(true) => {
                    info!("✅ Responder answered the call");
                    self.hangup_quietly(modem).await;
                    self.acknowledge();
                    return;
                }
                Ok(false) => {}
                Err(e) => warn!("Call status check failed: {}", e),
            }
        }

        debug!("Call window elapsed unanswered, retrying on the interval");
        self.hangup_quietly(modem).await;
    }

    /// Read unread inbound messages and apply the recognized keywords.
    /// Matching is case-insensitive substring; anything else is ignored.
    pub async fn poll_commands<M: ModemLink>(&mut self, modem: &mut CellularModem<M>) {
        let bodies = match modem.read_unread_sms().await {
            Ok(bodies) => bodies,
            Err(e) => {
                debug!("Inbound message poll failed: {}", e);
                return;
            }
        };
        let ack = self.config.ack_keyword.to_ascii_lowercase();
        let resume = self.config.resume_keyword.to_ascii_lowercase();
        for body in bodies {
            let lower = body.to_ascii_lowercase();
            if lower.contains(&ack) {
                info!("Acknowledgment received: {:?}", body);
                self.acknowledge();
            } else if lower.contains(&resume) {
                info!("Resume received: {:?}", body);
                self.reset();
            } else {
                debug!("Ignoring inbound message: {:?}", body);
            }
        }
    }

    /// `Active` -> `Handled`; a responder has the situation
    pub fn acknowledge(&mut self) {
        if self.state.phase == EmergencyPhase::Active {
            info!("Escalation acknowledged, standing down");
            self.state.phase = EmergencyPhase::Handled;
        }
    }

    /// Any phase -> `Idle`; the device re-arms
    pub fn reset(&mut self) {
        if self.state.phase != EmergencyPhase::Idle {
            info!("Escalation re-armed");
        }
        self.state = EmergencyState::default();
    }

    async fn hangup_quietly<M: ModemLink>(&mut self, modem: &mut CellularModem<M>) {
        if let Err(e) = modem.hangup().await {
            debug!("Hangup reported {}", e);
        }
    }
}
