//! Liveness watchdog.
//!
//! The control loop feeds the watchdog exactly once per iteration. A
//! supervisor task checks the feed age every second; when the loop stalls
//! past the deadline the process exits nonzero so the platform supervisor
//! restarts the device. Restart over limp-along: every subsystem rebuilds
//! its state from scratch at boot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::hal::{Clock, MonotonicClock};

/// Feed timestamp shared between the control loop and the supervisor task.
/// Carries its own monotonic base so both sides read the same clock.
#[derive(Debug)]
pub struct WatchdogState {
    clock: MonotonicClock,
    last_feed_ms: AtomicU64,
    timeout_ms: u64,
}

impl WatchdogState {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            clock: MonotonicClock::new(),
            last_feed_ms: AtomicU64::new(0),
            timeout_ms,
        }
    }

    pub fn feed(&self) {
        self.feed_at(self.clock.now_ms());
    }

    pub fn expired(&self) -> bool {
        self.expired_at(self.clock.now_ms())
    }

    fn feed_at(&self, now_ms: u64) {
        self.last_feed_ms.store(now_ms, Ordering::Relaxed);
    }

    fn expired_at(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_feed_ms.load(Ordering::Relaxed)) >= self.timeout_ms
    }
}

/// Spawn the supervisor task. Expiry ends the process; there is no
/// graceful path out of a stalled control loop.
pub fn spawn_supervisor(state: Arc<WatchdogState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            if state.expired() {
                error!(
                    "Watchdog expired: control loop silent past {}ms, restarting",
                    state.timeout_ms
                );
                std::process::exit(1);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_watchdog_is_not_expired() {
        let state = WatchdogState::new(30_000);
        assert!(!state.expired_at(0));
        assert!(!state.expired_at(29_999));
    }

    #[test]
    fn test_expires_without_feeding() {
        let state = WatchdogState::new(30_000);
        assert!(state.expired_at(30_000));
    }

    #[test]
    fn test_feeding_extends_the_deadline() {
        let state = WatchdogState::new(30_000);
        state.feed_at(25_000);
        assert!(!state.expired_at(54_999));
        assert!(state.expired_at(55_000));
    }
}
