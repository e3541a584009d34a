//! Synthetic hardware for bench runs and tests.
//!
//! Everything the monitor touches through a `hal` trait has a scripted
//! stand-in here: a pulse sensor that renders a photoplethysmogram for any
//! target vitals, an inertial unit that can inject an impact, an SOS button,
//! a modem link that speaks just enough of the AT conversation, and a WiFi
//! link that can be dropped and restored. The modem, WiFi and button fakes
//! hand out cloneable steering handles so a scenario (or a test) can change
//! conditions while the monitor owns the device.

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::hal::{
    ButtonInput, ModemError, ModemLink, MotionSensor, PulseSample, PulseSensor, SensorError,
    WifiError, WifiLink,
};
use crate::types::{MotionFrame, Vector3};

const RED_DC: f64 = 60_000.0;
const IR_DC: f64 = 110_000.0;
/// Pulsatile amplitude of the infrared channel as a fraction of its DC level
const IR_AC_FRACTION: f64 = 0.02;
/// Infrared level reported with the sensor against skin
const CONTACT_IR_LEVEL: u32 = 90_000;
/// Infrared level reported off-wrist
const AMBIENT_IR_LEVEL: u32 = 2_000;

/// One synthetic red/infrared pair at the given cardiac phase.
/// The waveform sums three harmonics so the systolic peak is sharp enough
/// for peak picking; the red channel's relative amplitude encodes the
/// target saturation through the standard calibration line.
fn ppg_pair(phase: f64, spo2_pct: f64) -> (u32, u32) {
    let pulse = -0.6 * phase.sin() - 0.3 * (2.0 * phase).sin() - 0.1 * (3.0 * phase).sin();
    let ratio = (110.0 - spo2_pct) / 25.0;
    let red = RED_DC * (1.0 + ratio * IR_AC_FRACTION * pulse);
    let ir = IR_DC * (1.0 + IR_AC_FRACTION * pulse);
    (red.round() as u32, ir.round() as u32)
}

/// Render a full photoplethysmogram window for the given vitals
pub fn synthetic_ppg(
    heart_rate_bpm: f64,
    spo2_pct: f64,
    sample_rate_hz: f64,
    len: usize,
) -> (Vec<u32>, Vec<u32>) {
    let step = 2.0 * PI * heart_rate_bpm / 60.0 / sample_rate_hz;
    (0..len).map(|k| ppg_pair(step * k as f64, spo2_pct)).unzip()
}

// ---------------------------------------------------------------------------
// Pulse sensor
// ---------------------------------------------------------------------------

/// Wall-clock-driven pulse sensor. Beats fire on the period of the target
/// rate; window samples advance one phase step per read, matching the
/// pipeline's paired-sample cadence.
pub struct SimPulseSensor {
    heart_rate_bpm: f64,
    spo2_pct: f64,
    contact: bool,
    started: Instant,
    last_beat_index: u64,
    phase: f64,
    phase_step: f64,
}

impl SimPulseSensor {
    pub fn new(heart_rate_bpm: f64, spo2_pct: f64, sample_rate_hz: f64) -> Self {
        Self {
            heart_rate_bpm,
            spo2_pct,
            contact: true,
            started: Instant::now(),
            last_beat_index: 0,
            phase: 0.0,
            phase_step: 2.0 * PI * heart_rate_bpm / 60.0 / sample_rate_hz,
        }
    }

    pub fn set_vitals(&mut self, heart_rate_bpm: f64, spo2_pct: f64, sample_rate_hz: f64) {
        self.heart_rate_bpm = heart_rate_bpm;
        self.spo2_pct = spo2_pct;
        self.phase_step = 2.0 * PI * heart_rate_bpm / 60.0 / sample_rate_hz;
    }

    pub fn set_contact(&mut self, contact: bool) {
        self.contact = contact;
    }
}

impl PulseSensor for SimPulseSensor {
    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn ir_level(&mut self) -> Result<u32, SensorError> {
        Ok(if self.contact {
            CONTACT_IR_LEVEL
        } else {
            AMBIENT_IR_LEVEL
        })
    }

    fn check_beat(&mut self) -> Result<bool, SensorError> {
        if self.heart_rate_bpm <= 0.0 {
            return Ok(false);
        }
        let period_ms = 60_000.0 / self.heart_rate_bpm;
        let index = (self.started.elapsed().as_millis() as f64 / period_ms) as u64;
        if index > self.last_beat_index {
            self.last_beat_index = index;
            return Ok(true);
        }
        Ok(false)
    }

    fn read_sample(&mut self) -> Result<PulseSample, SensorError> {
        let (red, ir) = ppg_pair(self.phase, self.spo2_pct);
        self.phase += self.phase_step;
        Ok(PulseSample { red, ir })
    }
}

// ---------------------------------------------------------------------------
// Motion sensor
// ---------------------------------------------------------------------------

/// Inertial unit that idles at quiet wear (gravity plus jitter) and plays
/// back injected frames first
pub struct SimMotionSensor {
    rng: StdRng,
    scripted: VecDeque<MotionFrame>,
}

impl SimMotionSensor {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            scripted: VecDeque::new(),
        }
    }

    /// Queue the impact frame of a fall; the rest frames that follow sit
    /// below the stillness threshold on their own
    pub fn inject_fall(&mut self) {
        self.scripted.push_back(MotionFrame {
            accel: Vector3::new(4.0, 6.0, 31.0),
            gyro: Vector3::new(40.0, 245.0, 60.0),
        });
    }

    pub fn push_frame(&mut self, frame: MotionFrame) {
        self.scripted.push_back(frame);
    }
}

impl Default for SimMotionSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionSensor for SimMotionSensor {
    fn init(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn read(&mut self) -> Result<MotionFrame, SensorError> {
        if let Some(frame) = self.scripted.pop_front() {
            return Ok(frame);
        }
        let ax = self.rng.gen_range(-0.3..0.3);
        let ay = self.rng.gen_range(-0.3..0.3);
        let az = 9.81 + self.rng.gen_range(-0.3..0.3);
        let gx = self.rng.gen_range(-2.0..2.0);
        let gy = self.rng.gen_range(-2.0..2.0);
        let gz = self.rng.gen_range(-2.0..2.0);
        Ok(MotionFrame {
            accel: Vector3::new(ax, ay, az),
            gyro: Vector3::new(gx, gy, gz),
        })
    }
}

// ---------------------------------------------------------------------------
// SOS button
// ---------------------------------------------------------------------------

/// Button whose level can be driven from a cloned handle
#[derive(Clone, Default)]
pub struct SimButton {
    pressed: Arc<AtomicBool>,
}

impl SimButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        self.pressed.store(true, Ordering::Relaxed);
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::Relaxed);
    }
}

impl ButtonInput for SimButton {
    fn is_pressed(&mut self) -> bool {
        self.pressed.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Modem link
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ModemState {
    sent_sms: Vec<(String, String)>,
    dialed: Vec<String>,
    http_posts: Vec<(String, String)>,
    inbound_sms: VecDeque<String>,
    answer_after_polls: Option<u32>,
    clcc_polls: u32,
    call_in_progress: bool,
    sms_failing: bool,
    http_status: u16,
    sms_target: Option<String>,
    sms_body: Vec<u8>,
    http_url: String,
    http_body_pending: bool,
    pending: Option<String>,
}

/// AT-conversation emulation behind a cloneable steering handle
#[derive(Clone)]
pub struct SimModemLink {
    state: Arc<Mutex<ModemState>>,
}

impl SimModemLink {
    pub fn new() -> Self {
        let state = ModemState {
            http_status: 200,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver an inbound text at the next unread-message poll
    pub fn push_inbound_sms(&self, body: &str) {
        self.lock().inbound_sms.push_back(body.to_string());
    }

    /// Report the outbound call as answered after this many status polls
    /// (0 answers on the first poll)
    pub fn answer_call_after_polls(&self, polls: u32) {
        self.lock().answer_after_polls = Some(polls);
    }

    pub fn set_sms_failing(&self, failing: bool) {
        self.lock().sms_failing = failing;
    }

    /// HTTP status the modem stack reports for POSTs (601 emulates a
    /// network error)
    pub fn set_http_status(&self, status: u16) {
        self.lock().http_status = status;
    }

    pub fn sent_sms(&self) -> Vec<(String, String)> {
        self.lock().sent_sms.clone()
    }

    pub fn dialed_numbers(&self) -> Vec<String> {
        self.lock().dialed.clone()
    }

    pub fn http_posts(&self) -> Vec<(String, String)> {
        self.lock().http_posts.clone()
    }

    pub fn call_in_progress(&self) -> bool {
        self.lock().call_in_progress
    }
}

impl Default for SimModemLink {
    fn default() -> Self {
        Self::new()
    }
}

impl ModemState {
    /// Route one command line and stage the text the next `wait_for` sees
    fn on_line(&mut self, line: &str) {
        let staged = if let Some(number) = line
            .strip_prefix("AT+CMGS=\"")
            .and_then(|rest| rest.strip_suffix('"'))
        {
            if self.sms_failing {
                "ERROR".to_string()
            } else {
                self.sms_target = Some(number.to_string());
                self.sms_body.clear();
                "> ".to_string()
            }
        } else if let Some(number) = line.strip_prefix("ATD").and_then(|r| r.strip_suffix(';')) {
            self.dialed.push(number.to_string());
            self.call_in_progress = true;
            self.clcc_polls = 0;
            "OK".to_string()
        } else if line == "AT+CLCC" {
            if self.call_in_progress {
                self.clcc_polls += 1;
                let answered = self
                    .answer_after_polls
                    .map(|n| self.clcc_polls > n)
                    .unwrap_or(false);
                let stat = if answered { 0 } else { 3 };
                format!("+CLCC: 1,0,{},0,0,\"+10000000000\",145\r\nOK", stat)
            } else {
                "OK".to_string()
            }
        } else if line == "ATH" {
            self.call_in_progress = false;
            "OK".to_string()
        } else if line.starts_with("AT+CMGL=") {
            let mut text = String::new();
            let mut index = 1;
            while let Some(body) = self.inbound_sms.pop_front() {
                text.push_str(&format!(
                    "+CMGL: {},\"REC UNREAD\",\"+10000000000\",,\"\"\r\n{}\r\n",
                    index, body
                ));
                index += 1;
            }
            text.push_str("OK");
            text
        } else if line == "AT+CGATT?" {
            "+CGATT: 1\r\nOK".to_string()
        } else if line == "AT+SAPBR=2,1" {
            "+SAPBR: 1,1,\"10.0.0.1\"\r\nOK".to_string()
        } else if let Some(url) = line
            .strip_prefix("AT+HTTPPARA=\"URL\",\"")
            .and_then(|rest| rest.strip_suffix('"'))
        {
            self.http_url = url.to_string();
            "OK".to_string()
        } else if line.starts_with("AT+HTTPDATA=") {
            self.http_body_pending = true;
            "DOWNLOAD".to_string()
        } else if line == "AT+HTTPACTION=1" {
            let body_len = self
                .http_posts
                .last()
                .map(|(_, body)| body.len())
                .unwrap_or(0);
            format!("OK\r\n+HTTPACTION: 1,{},{}", self.http_status, body_len)
        } else {
            // AT, ATE0, CMGF, SAPBR config, HTTPINIT, CID, CONTENT, HTTPTERM
            "OK".to_string()
        };
        self.pending = Some(staged);
    }

    fn on_raw(&mut self, data: &[u8]) {
        if self.http_body_pending {
            let body = String::from_utf8_lossy(data).into_owned();
            self.http_posts.push((self.http_url.clone(), body));
            self.http_body_pending = false;
            self.pending = Some("OK".to_string());
            return;
        }
        if data.len() == 1 && data[0] == 0x1A {
            if let Some(number) = self.sms_target.take() {
                let body = String::from_utf8_lossy(&self.sms_body).into_owned();
                self.sent_sms.push((number, body));
                self.sms_body.clear();
                self.pending = Some("+CMGS: 1\r\nOK".to_string());
            }
            return;
        }
        if self.sms_target.is_some() {
            self.sms_body.extend_from_slice(data);
        }
    }
}

impl ModemLink for SimModemLink {
    async fn send_line(&mut self, line: &str) -> Result<(), ModemError> {
        self.lock().on_line(line);
        Ok(())
    }

    async fn write_raw(&mut self, data: &[u8]) -> Result<(), ModemError> {
        self.lock().on_raw(data);
        Ok(())
    }

    async fn wait_for(&mut self, token: &str, _timeout: Duration) -> Result<String, ModemError> {
        // The emulation answers instantly, so failures surface without
        // consuming the caller's deadline
        let pending = self.lock().pending.take();
        match pending {
            Some(text) if text.contains(token) => Ok(text),
            Some(text) if text.contains("ERROR") => {
                Err(ModemError::CommandFailed { response: text })
            }
            _ => Err(ModemError::Timeout {
                expected: token.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// WiFi link
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct WifiState {
    up: bool,
    reconnectable: bool,
    reconnect_attempts: u32,
    posts: Vec<(String, String)>,
    status: u16,
    posts_failing: bool,
}

/// WiFi stand-in whose access point can be dropped and restored mid-run
#[derive(Clone)]
pub struct SimWifiLink {
    state: Arc<Mutex<WifiState>>,
}

impl SimWifiLink {
    pub fn new(up: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(WifiState {
                up,
                reconnectable: up,
                reconnect_attempts: 0,
                posts: Vec::new(),
                status: 200,
                posts_failing: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WifiState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Access point gone: association drops and re-association fails
    pub fn drop_link(&self) {
        let mut state = self.lock();
        state.up = false;
        state.reconnectable = false;
    }

    /// Access point back: the next re-association attempt succeeds
    pub fn restore_link(&self) {
        self.lock().reconnectable = true;
    }

    /// Associated, but every POST fails at the transport level
    pub fn set_posts_failing(&self, failing: bool) {
        self.lock().posts_failing = failing;
    }

    pub fn set_status(&self, status: u16) {
        self.lock().status = status;
    }

    pub fn posts(&self) -> Vec<(String, String)> {
        self.lock().posts.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }
}

impl WifiLink for SimWifiLink {
    async fn is_connected(&mut self) -> bool {
        self.lock().up
    }

    async fn reconnect(&mut self) -> Result<(), WifiError> {
        let mut state = self.lock();
        state.reconnect_attempts += 1;
        if state.reconnectable {
            state.up = true;
            Ok(())
        } else {
            Err(WifiError::NotAssociated)
        }
    }

    async fn post_json(
        &mut self,
        url: &str,
        body: &str,
        _timeout: Duration,
    ) -> Result<u16, WifiError> {
        let mut state = self.lock();
        if !state.up || state.posts_failing {
            return Err(WifiError::Request("no route to host".to_string()));
        }
        state.posts.push((url.to_string(), body.to_string()));
        Ok(state.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_ppg_encodes_the_ratio() {
        let (red, ir) = synthetic_ppg(72.0, 97.0, 100.0, 400);
        assert_eq!(red.len(), 400);
        assert_eq!(ir.len(), 400);

        let spread = |v: &[u32]| {
            let max = *v.iter().max().unwrap() as f64;
            let min = *v.iter().min().unwrap() as f64;
            max - min
        };
        // Healthy saturation keeps the red channel's swing well below the
        // infrared's relative to their DC levels
        let red_rel = spread(&red) / RED_DC;
        let ir_rel = spread(&ir) / IR_DC;
        assert!(red_rel < ir_rel, "red {:.4} vs ir {:.4}", red_rel, ir_rel);
    }

    #[tokio::test]
    async fn test_modem_link_plays_the_sms_conversation() {
        let mut link = SimModemLink::new();
        let handle = link.clone();

        link.send_line("AT+CMGS=\"+15550100\"").await.unwrap();
        assert!(link.wait_for(">", Duration::from_secs(1)).await.is_ok());
        link.write_raw(b"hello").await.unwrap();
        link.write_raw(&[0x1A]).await.unwrap();
        assert!(link.wait_for("+CMGS", Duration::from_secs(1)).await.is_ok());

        assert_eq!(
            handle.sent_sms(),
            vec![("+15550100".to_string(), "hello".to_string())]
        );
    }

    #[tokio::test]
    async fn test_modem_link_call_answer_script() {
        let mut link = SimModemLink::new();
        let handle = link.clone();
        handle.answer_call_after_polls(2);

        link.send_line("ATD+15550100;").await.unwrap();
        link.wait_for("OK", Duration::from_secs(1)).await.unwrap();

        for expect_answered in [false, false, true] {
            link.send_line("AT+CLCC").await.unwrap();
            let text = link.wait_for("OK", Duration::from_secs(1)).await.unwrap();
            assert_eq!(
                text.contains("+CLCC: 1,0,0"),
                expect_answered,
                "unexpected call state in {:?}",
                text
            );
        }
    }

    #[tokio::test]
    async fn test_wifi_link_drop_and_restore() {
        let mut link = SimWifiLink::new(true);
        let handle = link.clone();
        assert!(link.is_connected().await);

        handle.drop_link();
        assert!(!link.is_connected().await);
        assert!(link.reconnect().await.is_err());

        handle.restore_link();
        assert!(link.reconnect().await.is_ok());
        assert!(link.is_connected().await);
        assert_eq!(handle.reconnect_attempts(), 2);
    }
}
