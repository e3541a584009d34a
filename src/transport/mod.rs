//! Delivery of readings to the ingestion endpoint.
//!
//! WiFi is the preferred path, the cellular modem's HTTP stack is the
//! fallback, and the offline queue is the last resort. The two paths
//! define success differently on purpose: any HTTP response proves the
//! WiFi path works end to end, while the modem path trusts only a 2xx
//! status because its stack reports radio-level failures as synthetic
//! status codes.

pub mod queue;

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::hal::{Clock, ModemLink, WifiError, WifiLink};
use crate::modem::CellularModem;
use crate::types::{UploadKind, UploadRecord};
use queue::OfflineQueue;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Ingestion endpoint for reading uploads
    pub endpoint_url: String,
    /// Carrier access point name for the GPRS bearer
    pub apn: String,
    /// WiFi POST attempts per delivery before falling back
    pub wifi_retry_attempts: u32,
    /// Per-attempt timeout
    pub wifi_attempt_timeout_ms: u64,
    /// Pause between attempts
    pub wifi_retry_delay_ms: u64,
    /// Spacing of re-association attempts while WiFi is down
    pub wifi_reconnect_interval_ms: u64,
    /// Offline queue slots
    pub queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://127.0.0.1:8080/v1/readings".to_string(),
            apn: "internet".to_string(),
            wifi_retry_attempts: 3,
            wifi_attempt_timeout_ms: 10_000,
            wifi_retry_delay_ms: 500,
            wifi_reconnect_interval_ms: 30_000,
            queue_capacity: 5,
        }
    }
}

/// Delivery policy and link-state tracking. The offline queue itself is
/// owned by the control loop and lent to `flush_queue`.
pub struct Transport {
    config: TransportConfig,
    wifi_up: bool,
    last_reconnect_ms: Option<u64>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            wifi_up: false,
            last_reconnect_ms: None,
        }
    }

    pub fn wifi_up(&self) -> bool {
        self.wifi_up
    }

    /// Per-iteration connectivity upkeep: refresh the association state
    /// and, while down, retry association on the configured interval.
    /// Returns true when WiFi just came back so the caller can flush the
    /// offline queue.
    pub async fn check_connectivity<W: WifiLink>(
        &mut self,
        wifi: &mut W,
        clock: &impl Clock,
    ) -> bool {
        let was_up = self.wifi_up;
        self.wifi_up = wifi.is_connected().await;

        if !self.wifi_up {
            let now = clock.now_ms();
            let due = match self.last_reconnect_ms {
                None => true,
                Some(at) => {
                    now.saturating_sub(at) >= self.config.wifi_reconnect_interval_ms
                }
            };
            if due {
                self.last_reconnect_ms = Some(now);
                debug!("WiFi down, attempting re-association");
                match wifi.reconnect().await {
                    Ok(()) => {
                        info!("📡 WiFi re-associated");
                        self.wifi_up = true;
                    }
                    Err(e) => debug!("WiFi re-association failed: {}", e),
                }
            }
        }

        if self.wifi_up {
            self.last_reconnect_ms = None;
        }
        self.wifi_up && !was_up
    }

    /// Deliver one record: WiFi with bounded retries first, then the modem
    /// bridge. Returns true on confirmed delivery.
    pub async fn deliver<W: WifiLink, M: ModemLink>(
        &mut self,
        record: &UploadRecord<'_>,
        wifi: &mut W,
        modem: &mut CellularModem<M>,
    ) -> bool {
        let body = match serde_json::to_string(record) {
            Ok(body) => body,
            Err(e) => {
                warn!("Reading serialization failed: {}", e);
                return false;
            }
        };

        if self.wifi_up && self.deliver_wifi(&body, wifi).await {
            return true;
        }
        self.deliver_modem(&body, modem).await
    }

    async fn deliver_wifi<W: WifiLink>(&mut self, body: &str, wifi: &mut W) -> bool {
        let timeout = Duration::from_millis(self.config.wifi_attempt_timeout_ms);
        for attempt in 1..=self.config.wifi_retry_attempts {
            match wifi.post_json(&self.config.endpoint_url, body, timeout).await {
                // Any response at all proves the path works end to end
                Ok(status) => {
                    debug!("WiFi upload attempt {} got HTTP {}", attempt, status);
                    return true;
                }
                Err(e) => warn!("WiFi upload attempt {} failed: {}", attempt, e),
            }
            if attempt < self.config.wifi_retry_attempts {
                sleep(Duration::from_millis(self.config.wifi_retry_delay_ms)).await;
            }
        }
        // Every attempt failed at the transport level: treat the link as
        // down until the next association check says otherwise
        self.wifi_up = false;
        false
    }

    async fn deliver_modem<M: ModemLink>(
        &mut self,
        body: &str,
        modem: &mut CellularModem<M>,
    ) -> bool {
        if let Err(e) = modem.ensure_bearer(&self.config.apn).await {
            warn!("GPRS bearer unavailable: {}", e);
            return false;
        }
        match modem.http_post(&self.config.endpoint_url, body).await {
            Ok(status) if (200..300).contains(&status) => {
                debug!("Modem upload got HTTP {}", status);
                true
            }
            Ok(status) => {
                warn!("Modem upload rejected with HTTP {}", status);
                false
            }
            Err(e) => {
                warn!("Modem upload failed: {}", e);
                false
            }
        }
    }

    /// Redeliver parked readings in arrival order, marking the replayed
    /// records. A slot clears only on confirmed delivery; the rest stay
    /// parked for the next recovery.
    pub async fn flush_queue<W: WifiLink, M: ModemLink>(
        &mut self,
        queue: &mut OfflineQueue,
        wifi: &mut W,
        modem: &mut CellularModem<M>,
    ) {
        if queue.is_empty() {
            return;
        }
        info!("💾 Flushing {} parked reading(s)", queue.len());
        let mut delivered = 0;
        for slot in queue.slots_mut() {
            let ok = {
                let record = UploadRecord::new(&slot.reading, UploadKind::Queued);
                self.deliver(&record, wifi, modem).await
            };
            if ok {
                slot.pending = false;
                delivered += 1;
            }
        }
        queue.clear_delivered();
        info!(
            "Flush complete: {} delivered, {} still parked",
            delivered,
            queue.len()
        );
    }
}

/// WiFi path over the host network stack. Association state is inferred:
/// request failures mark the link down, and a cheap probe against the
/// ingestion host stands in for the driver's association check.
pub struct HttpWifiLink {
    client: reqwest::Client,
    probe_url: String,
    associated: bool,
}

impl HttpWifiLink {
    pub fn new(probe_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            probe_url: probe_url.to_string(),
            associated: true,
        }
    }
}

impl WifiLink for HttpWifiLink {
    async fn is_connected(&mut self) -> bool {
        self.associated
    }

    async fn reconnect(&mut self) -> Result<(), WifiError> {
        let result = self
            .client
            .head(&self.probe_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match result {
            Ok(_) => {
                self.associated = true;
                Ok(())
            }
            Err(e) => {
                self.associated = false;
                Err(WifiError::Request(e.to_string()))
            }
        }
    }

    async fn post_json(
        &mut self,
        url: &str,
        body: &str,
        timeout: Duration,
    ) -> Result<u16, WifiError> {
        let result = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .timeout(timeout)
            .send()
            .await;
        match result {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) => {
                self.associated = false;
                Err(WifiError::Request(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::FakeClock;
    use crate::sim::{SimModemLink, SimWifiLink};
    use crate::types::{MotionFrame, Reading};

    fn rig(wifi_up: bool) -> (Transport, SimWifiLink, CellularModem<SimModemLink>, SimModemLink) {
        let transport = Transport::new(TransportConfig::default());
        let wifi = SimWifiLink::new(wifi_up);
        let link = SimModemLink::new();
        let modem_handle = link.clone();
        (transport, wifi, CellularModem::new(link), modem_handle)
    }

    fn reading() -> Reading {
        Reading::new("vigil-test", 72.0, 97.0, &MotionFrame::default(), 40.7, -74.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wifi_path_preferred() {
        let (mut transport, mut wifi, mut modem, modem_handle) = rig(true);
        let clock = FakeClock::new(0);
        transport.check_connectivity(&mut wifi, &clock).await;

        let sample = reading();
        let record = UploadRecord::new(&sample, UploadKind::Periodic);
        assert!(transport.deliver(&record, &mut wifi, &mut modem).await);

        let posts = wifi.posts();
        assert_eq!(posts.len(), 1);
        assert!(modem_handle.http_posts().is_empty(), "modem must stay idle");

        let value: serde_json::Value = serde_json::from_str(&posts[0].1).unwrap();
        assert_eq!(value["device_id"], "vigil-test");
        assert!(value.get("emergency").is_none(), "periodic records carry no flags");
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_wifi_response_is_success() {
        let (mut transport, mut wifi, mut modem, _) = rig(true);
        let clock = FakeClock::new(0);
        transport.check_connectivity(&mut wifi, &clock).await;
        wifi.set_status(500);

        let sample = reading();
        let record = UploadRecord::new(&sample, UploadKind::Periodic);
        assert!(
            transport.deliver(&record, &mut wifi, &mut modem).await,
            "a 500 still proves the path works"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_modem_fallback_after_wifi_retries() {
        let (mut transport, mut wifi, mut modem, modem_handle) = rig(true);
        let clock = FakeClock::new(0);
        transport.check_connectivity(&mut wifi, &clock).await;
        wifi.set_posts_failing(true);

        let sample = reading();
        let record = UploadRecord::new(&sample, UploadKind::Emergency { manual: false });
        assert!(transport.deliver(&record, &mut wifi, &mut modem).await);

        assert!(!transport.wifi_up(), "exhausted retries mark the link down");
        let posts = modem_handle.http_posts();
        assert_eq!(posts.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&posts[0].1).unwrap();
        assert_eq!(value["emergency"], true);
        assert!(value.get("manual_trigger").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_modem_rejects_non_2xx() {
        let (mut transport, mut wifi, mut modem, modem_handle) = rig(false);
        modem_handle.set_http_status(601);

        let sample = reading();
        let record = UploadRecord::new(&sample, UploadKind::Periodic);
        assert!(
            !transport.deliver(&record, &mut wifi, &mut modem).await,
            "601 from the modem stack is a radio failure, not a delivery"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_runs_on_the_interval() {
        let (mut transport, mut wifi, _modem, _) = rig(false);
        let clock = FakeClock::new(0);

        assert!(!transport.check_connectivity(&mut wifi, &clock).await);
        assert_eq!(wifi.reconnect_attempts(), 1);

        // Polled every iteration, but association retries hold the interval
        clock.advance(10_000);
        transport.check_connectivity(&mut wifi, &clock).await;
        assert_eq!(wifi.reconnect_attempts(), 1);

        clock.advance(20_000);
        transport.check_connectivity(&mut wifi, &clock).await;
        assert_eq!(wifi.reconnect_attempts(), 2);

        // Access point back: the next due attempt recovers the link
        wifi.restore_link();
        clock.advance(30_000);
        assert!(
            transport.check_connectivity(&mut wifi, &clock).await,
            "recovery must be reported so the queue gets flushed"
        );
        assert!(transport.wifi_up());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_replays_in_order_with_queued_flag() {
        let (mut transport, mut wifi, mut modem, _) = rig(false);
        let clock = FakeClock::new(0);
        let mut queue = OfflineQueue::new(5);

        for hr in [70.0, 71.0, 72.0] {
            queue.enqueue(Reading::new(
                "vigil-test",
                hr,
                97.0,
                &MotionFrame::default(),
                40.7,
                -74.0,
            ));
        }

        wifi.restore_link();
        clock.advance(30_000);
        assert!(transport.check_connectivity(&mut wifi, &clock).await);
        transport.flush_queue(&mut queue, &mut wifi, &mut modem).await;

        assert!(queue.is_empty(), "delivered slots must clear");
        let posts = wifi.posts();
        assert_eq!(posts.len(), 3);
        for (i, (_, body)) in posts.iter().enumerate() {
            let value: serde_json::Value = serde_json::from_str(body).unwrap();
            assert_eq!(value["queued"], true, "replayed records carry the flag");
            assert_eq!(value["heart_rate"], 70.0 + i as f64, "arrival order preserved");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_keeps_undelivered_slots() {
        let (mut transport, mut wifi, mut modem, modem_handle) = rig(false);
        modem_handle.set_http_status(601);
        let mut queue = OfflineQueue::new(5);
        queue.enqueue(reading());
        queue.enqueue(reading());

        // Both paths down: nothing clears
        transport.flush_queue(&mut queue, &mut wifi, &mut modem).await;
        assert_eq!(queue.len(), 2);
    }
}
