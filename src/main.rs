//! Vigil Core
//!
//! Firmware core of a wrist-worn vital-sign monitor, running here against
//! bench implementations of the sensor and modem hardware.
//!
//! Usage:
//!   vigil-core [OPTIONS]
//!
//! Options:
//!   --endpoint <URL>        Upload endpoint (default: http://127.0.0.1:8080/v1/readings)
//!   --responder <NUMBER>    Responder phone number (default: +15550100)
//!   --apn <APN>             Cellular APN (default: internet)
//!   --device-seed <SEED>    Derive the device id from SEED instead of the host
//!   --upload-interval <MS>  Scheduled upload spacing in ms (default: 120000)
//!   --scenario <NAME>       Bench wearer script: rest, fall, critical (default: rest)
//!   --help                  Print this help
//!
//! While running, `trigger`, `reset` and `status` on stdin act as the
//! device buttons.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vigil_core::escalation::EscalationConfig;
use vigil_core::hal::MonotonicClock;
use vigil_core::identity::DeviceIdentity;
use vigil_core::monitor::{Monitor, MonitorConfig};
use vigil_core::sim::{SimButton, SimModemLink, SimMotionSensor, SimPulseSensor};
use vigil_core::transport::{HttpWifiLink, TransportConfig};
use vigil_core::types::{MotionFrame, OperatorCommand, Vector3};

/// Scripted wearer on the bench: at rest, falling after ten seconds, or in
/// sustained tachycardia.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Rest,
    Fall,
    Critical,
}

impl Scenario {
    fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "rest" => Some(Scenario::Rest),
            "fall" => Some(Scenario::Fall),
            "critical" => Some(Scenario::Critical),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Config {
    endpoint: String,
    responder: String,
    apn: String,
    device_seed: Option<String>,
    upload_interval_ms: u64,
    scenario: Scenario,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/v1/readings".to_string(),
            responder: "+15550100".to_string(),
            apn: "internet".to_string(),
            device_seed: None,
            upload_interval_ms: 120_000,
            scenario: Scenario::Rest,
        }
    }
}

fn print_usage() {
    println!("Usage: vigil-core [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --endpoint <URL>        Upload endpoint (default: http://127.0.0.1:8080/v1/readings)");
    println!("  --responder <NUMBER>    Responder phone number (default: +15550100)");
    println!("  --apn <APN>             Cellular APN (default: internet)");
    println!("  --device-seed <SEED>    Derive the device id from SEED instead of the host");
    println!("  --upload-interval <MS>  Scheduled upload spacing in ms (default: 120000)");
    println!("  --scenario <NAME>       Bench wearer script: rest, fall, critical (default: rest)");
    println!("  --help                  Print this help");
}

fn parse_args() -> Config {
    let mut config = Config::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--endpoint" => {
                config.endpoint = args.get(i + 1)
                    .cloned()
                    .unwrap_or_else(|| "http://127.0.0.1:8080/v1/readings".to_string());
                i += 1;
            }
            "--responder" => {
                config.responder = args.get(i + 1)
                    .cloned()
                    .unwrap_or_else(|| "+15550100".to_string());
                i += 1;
            }
            "--apn" => {
                config.apn = args.get(i + 1)
                    .cloned()
                    .unwrap_or_else(|| "internet".to_string());
                i += 1;
            }
            "--device-seed" => {
                config.device_seed = args.get(i + 1).cloned();
                i += 1;
            }
            "--upload-interval" => {
                config.upload_interval_ms = args.get(i + 1)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120_000);
                i += 1;
            }
            "--scenario" => {
                config.scenario = args.get(i + 1)
                    .and_then(|s| Scenario::parse(s))
                    .unwrap_or(Scenario::Rest);
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .pretty()
        .init();

    let config = parse_args();

    println!(r#"
    ╔═══════════════════════════════════════════════════════════╗
    ║                                                           ║
    ║   💓  VIGIL CORE                                          ║
    ║       Wearable Vital-Sign Monitor                         ║
    ║                                                           ║
    ╚═══════════════════════════════════════════════════════════╝
    "#);

    let identity = match &config.device_seed {
        Some(seed) => DeviceIdentity::from_seed(seed.as_bytes()),
        None => DeviceIdentity::from_host(),
    };

    info!("Starting Vigil Core...");
    info!("  Device: {}", identity.as_str());
    info!("  Endpoint: {}", config.endpoint);
    info!("  Responder: {}", config.responder);
    info!("  APN: {}", config.apn);
    info!("  Upload Interval: {}ms", config.upload_interval_ms);
    info!("  Scenario: {:?}", config.scenario);

    let monitor_config = MonitorConfig {
        escalation: EscalationConfig {
            responder_number: config.responder.clone(),
            ..Default::default()
        },
        transport: TransportConfig {
            endpoint_url: config.endpoint.clone(),
            apn: config.apn.clone(),
            ..Default::default()
        },
        upload_interval_ms: config.upload_interval_ms,
        ..Default::default()
    };

    // Bench hardware: scripted wearer on simulated sensors and modem, with
    // real HTTP on the WiFi path
    let sample_rate_hz = 1000.0 / monitor_config.vitals.spo2_sample_interval_ms as f64;
    let (heart_rate, spo2) = match config.scenario {
        Scenario::Critical => (155.0, 96.0),
        Scenario::Rest | Scenario::Fall => (72.0, 97.0),
    };
    let pulse = SimPulseSensor::new(heart_rate, spo2, sample_rate_hz);
    let mut imu = SimMotionSensor::new();
    if config.scenario == Scenario::Fall {
        // Ten seconds at rest, then the impact script
        let rest_frames = 10_000 / monitor_config.loop_interval_ms;
        for _ in 0..rest_frames {
            imu.push_frame(MotionFrame {
                accel: Vector3::new(0.0, 0.0, 9.81),
                gyro: Vector3::default(),
            });
        }
        imu.inject_fall();
    }
    let modem_link = SimModemLink::new();
    let wifi = HttpWifiLink::new(&config.endpoint);

    // Stdin stands in for the device buttons
    let (command_tx, command_rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match OperatorCommand::parse(&line) {
                Some(command) => {
                    if command_tx.send(command).await.is_err() {
                        break;
                    }
                }
                None => {
                    if !line.trim().is_empty() {
                        warn!("Unknown command {:?} (trigger | reset | status)", line.trim());
                    }
                }
            }
        }
    });

    let monitor = Monitor::new(
        monitor_config,
        identity,
        MonotonicClock::new(),
        pulse,
        imu,
        SimButton::new(),
        modem_link,
        wifi,
        command_rx,
    );
    monitor.run().await?;

    Ok(())
}
