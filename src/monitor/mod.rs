//! The control loop.
//!
//! One `Monitor` owns every subsystem and drives them in a fixed order per
//! iteration: connectivity upkeep, vitals and motion acquisition, anomaly
//! evaluation, the escalation machine, inbound commands, and the scheduled
//! upload. The loop is cooperative: nothing in an iteration blocks beyond
//! its own bounded timeout, and the watchdog catches anything that slips.

pub mod watchdog;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::detect::fall::{FallConfig, FallDetector};
use crate::detect::{Anomaly, ThresholdConfig, VitalsClassifier};
use crate::escalation::{Escalation, EscalationConfig};
use crate::hal::{ButtonInput, Clock, ModemLink, MotionSensor, PulseSensor, WifiLink};
use crate::identity::DeviceIdentity;
use crate::modem::CellularModem;
use crate::motion::{self, MotionSnapshot};
use crate::transport::queue::OfflineQueue;
use crate::transport::{Transport, TransportConfig};
use crate::types::{OperatorCommand, Reading, UploadKind, UploadRecord};
use crate::vitals::{VitalSigns, VitalsConfig, VitalsPipeline};
use watchdog::WatchdogState;

/// Everything a deployment can tune, aggregated per subsystem
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub vitals: VitalsConfig,
    pub thresholds: ThresholdConfig,
    pub fall: FallConfig,
    pub escalation: EscalationConfig,
    pub transport: TransportConfig,
    /// Pacing sleep per iteration; also sets the beat poll rate
    pub loop_interval_ms: u64,
    /// Control-loop liveness deadline
    pub watchdog_timeout_ms: u64,
    /// Scheduled upload spacing
    pub upload_interval_ms: u64,
    /// Hold time on the SOS button before it fires
    pub long_press_ms: u64,
    /// Releases shorter than this are contact bounce, not a release
    pub button_debounce_ms: u64,
    /// Installed position, reported with every reading
    pub gps_lat: f64,
    pub gps_long: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            vitals: VitalsConfig::default(),
            thresholds: ThresholdConfig::default(),
            fall: FallConfig::default(),
            escalation: EscalationConfig::default(),
            transport: TransportConfig::default(),
            loop_interval_ms: 10,
            watchdog_timeout_ms: 30_000,
            upload_interval_ms: 120_000,
            long_press_ms: 2_000,
            button_debounce_ms: 50,
            gps_lat: 0.0,
            gps_long: 0.0,
        }
    }
}

/// Debounced hold tracker for the SOS button. Fires once per hold when the
/// press has lasted the threshold; a release shorter than the debounce time
/// keeps the original press anchor.
#[derive(Debug)]
struct LongPress {
    threshold_ms: u64,
    debounce_ms: u64,
    pressed_at: Option<u64>,
    released_at: Option<u64>,
    fired: bool,
}

impl LongPress {
    fn new(threshold_ms: u64, debounce_ms: u64) -> Self {
        Self {
            threshold_ms,
            debounce_ms,
            pressed_at: None,
            released_at: None,
            fired: false,
        }
    }

    fn update(&mut self, now_ms: u64, pressed: bool) -> bool {
        if pressed {
            self.released_at = None;
            let start = *self.pressed_at.get_or_insert(now_ms);
            if !self.fired && now_ms.saturating_sub(start) >= self.threshold_ms {
                self.fired = true;
                return true;
            }
        } else if self.pressed_at.is_some() {
            let released = *self.released_at.get_or_insert(now_ms);
            if now_ms.saturating_sub(released) >= self.debounce_ms {
                self.pressed_at = None;
                self.released_at = None;
                self.fired = false;
            }
        }
        false
    }
}

pub struct Monitor<C, P, I, B, M, W>
where
    C: Clock,
    P: PulseSensor,
    I: MotionSensor,
    B: ButtonInput,
    M: ModemLink,
    W: WifiLink,
{
    config: MonitorConfig,
    identity: DeviceIdentity,
    clock: C,
    pulse: P,
    imu: I,
    button: B,
    modem: CellularModem<M>,
    wifi: W,
    vitals: VitalsPipeline,
    classifier: VitalsClassifier,
    fall: FallDetector,
    escalation: Escalation,
    transport: Transport,
    queue: OfflineQueue,
    long_press: LongPress,
    watchdog: Arc<WatchdogState>,
    commands: mpsc::Receiver<OperatorCommand>,
    pulse_ok: bool,
    imu_ok: bool,
    last_upload_ms: u64,
}

impl<C, P, I, B, M, W> Monitor<C, P, I, B, M, W>
where
    C: Clock,
    P: PulseSensor,
    I: MotionSensor,
    B: ButtonInput,
    M: ModemLink,
    W: WifiLink,
{
    pub fn new(
        config: MonitorConfig,
        identity: DeviceIdentity,
        clock: C,
        pulse: P,
        imu: I,
        button: B,
        modem_link: M,
        wifi: W,
        commands: mpsc::Receiver<OperatorCommand>,
    ) -> Self {
        let vitals = VitalsPipeline::new(config.vitals.clone());
        let classifier =
            VitalsClassifier::new(config.thresholds.clone(), config.vitals.min_valid_beats);
        let fall = FallDetector::new(config.fall.clone());
        let escalation = Escalation::new(
            config.escalation.clone(),
            identity.as_str(),
            config.gps_lat,
            config.gps_long,
        );
        let transport = Transport::new(config.transport.clone());
        let queue = OfflineQueue::new(config.transport.queue_capacity);
        let long_press = LongPress::new(config.long_press_ms, config.button_debounce_ms);
        let watchdog = Arc::new(WatchdogState::new(config.watchdog_timeout_ms));

        Self {
            config,
            identity,
            clock,
            pulse,
            imu,
            button,
            modem: CellularModem::new(modem_link),
            wifi,
            vitals,
            classifier,
            fall,
            escalation,
            transport,
            queue,
            long_press,
            watchdog,
            commands,
            pulse_ok: false,
            imu_ok: false,
            last_upload_ms: 0,
        }
    }

    /// Power-on self-test. A failed sensor degrades its subsystem instead
    /// of blocking boot; a dead modem is retried by every later use.
    pub async fn boot(&mut self) {
        info!("💓 Device {} booting", self.identity.as_str());

        self.pulse_ok = match self.pulse.init() {
            Ok(()) => true,
            Err(e) => {
                warn!("Pulse sensor offline: {}", e);
                false
            }
        };
        self.imu_ok = match self.imu.init() {
            Ok(()) => true,
            Err(e) => {
                warn!("Motion sensor offline: {}", e);
                false
            }
        };
        if let Err(e) = self.modem.init().await {
            warn!("Modem offline: {}", e);
        }

        info!("Self-test:");
        info!("   Pulse sensor: {}", if self.pulse_ok { "ok" } else { "OFFLINE" });
        info!("   Motion sensor: {}", if self.imu_ok { "ok" } else { "OFFLINE" });
    }

    /// One control-loop iteration, in fixed order
    pub async fn step(&mut self) {
        // 1. Connectivity upkeep; recovery flushes the offline queue
        let regained = self
            .transport
            .check_connectivity(&mut self.wifi, &self.clock)
            .await;
        if regained {
            self.transport
                .flush_queue(&mut self.queue, &mut self.wifi, &mut self.modem)
                .await;
        }

        // 2. Acquisition
        let signs = if self.pulse_ok {
            self.vitals.step(&self.clock, &mut self.pulse)
        } else {
            VitalSigns::default()
        };
        let snapshot = if self.imu_ok {
            motion::sample(&mut self.imu)
        } else {
            MotionSnapshot::default()
        };

        // 3. Anomaly evaluation; a fresh trigger ships an immediate record
        if let Some(anomaly) =
            self.classifier
                .evaluate(&signs, self.vitals.has_contact(), self.vitals.valid_beats())
        {
            self.escalate(anomaly, &signs, &snapshot).await;
        }
        let now = self.clock.now_ms();
        if let Some(anomaly) =
            self.fall
                .update(now, snapshot.accel_magnitude, snapshot.gyro_magnitude)
        {
            self.escalate(anomaly, &signs, &snapshot).await;
        }

        // 4. Escalation machine (bounded by the call-monitor window)
        self.escalation.step(&mut self.modem, &self.clock).await;

        // 5. Inbound commands: responder texts, the SOS button, then the
        //    local operator
        self.escalation.poll_commands(&mut self.modem).await;
        if self.long_press.update(now, self.button.is_pressed()) {
            info!("SOS button held");
            if self.escalation.trigger_manual(&mut self.modem).await {
                self.upload(&signs, &snapshot, UploadKind::Emergency { manual: true })
                    .await;
            }
        }
        self.drain_operator_commands(&signs, &snapshot).await;

        // 6. Scheduled upload, redundant with emergency records on purpose
        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_upload_ms) >= self.config.upload_interval_ms {
            self.last_upload_ms = now;
            self.upload(&signs, &snapshot, UploadKind::Periodic).await;
        }
    }

    /// Boot, then iterate until the process ends. The watchdog is fed
    /// exactly once per iteration, after the work and before the pacing
    /// sleep.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.boot().await;
        watchdog::spawn_supervisor(self.watchdog.clone());
        info!("Monitoring started");

        loop {
            self.step().await;
            self.watchdog.feed();
            sleep(Duration::from_millis(self.config.loop_interval_ms)).await;
        }
    }

    async fn escalate(&mut self, anomaly: Anomaly, signs: &VitalSigns, snapshot: &MotionSnapshot) {
        let cause = anomaly.to_string();
        if self.escalation.trigger(&cause, &mut self.modem).await {
            self.upload(signs, snapshot, UploadKind::Emergency { manual: false })
                .await;
        }
    }

    /// Build the wire record for this iteration and deliver it, parking it
    /// offline on total failure
    async fn upload(&mut self, signs: &VitalSigns, snapshot: &MotionSnapshot, kind: UploadKind) {
        let reading = Reading::new(
            self.identity.as_str(),
            signs.heart_rate,
            signs.spo2,
            &snapshot.frame,
            self.config.gps_lat,
            self.config.gps_long,
        );
        let delivered = {
            let record = UploadRecord::new(&reading, kind);
            self.transport
                .deliver(&record, &mut self.wifi, &mut self.modem)
                .await
        };
        if !delivered {
            self.queue.enqueue(reading);
        }
    }

    async fn drain_operator_commands(&mut self, signs: &VitalSigns, snapshot: &MotionSnapshot) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                OperatorCommand::Trigger => {
                    info!("Operator trigger");
                    if self.escalation.trigger_manual(&mut self.modem).await {
                        self.upload(signs, snapshot, UploadKind::Emergency { manual: true })
                            .await;
                    }
                }
                OperatorCommand::Reset => {
                    info!("Operator reset");
                    self.escalation.reset();
                }
                OperatorCommand::Status => {
                    info!("Status:");
                    info!("   Escalation: {:?} ({})", self.escalation.phase(), {
                        let cause = self.escalation.cause();
                        if cause.is_empty() { "no cause" } else { cause }
                    });
                    info!("   HR: {:.0} BPM, SpO2: {:.0}%", signs.heart_rate, signs.spo2);
                    info!(
                        "   Contact: {}, valid beats: {}",
                        self.vitals.has_contact(),
                        self.vitals.valid_beats()
                    );
                    info!(
                        "   WiFi: {}, queued readings: {}",
                        if self.transport.wifi_up() { "up" } else { "down" },
                        self.queue.len()
                    );
                }
            }
        }
    }
}
