//! Offline durability queue.
//!
//! Fixed-capacity ring of readings that could not be delivered. Bounded
//! memory wins over completeness: under a sustained outage the oldest
//! parked reading is overwritten.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::types::Reading;

/// One parked reading awaiting redelivery
#[derive(Debug, Clone)]
pub struct QueueSlot {
    pub reading: Reading,
    /// Cleared when a flush pass confirms delivery
    pub pending: bool,
}

#[derive(Debug)]
pub struct OfflineQueue {
    slots: VecDeque<QueueSlot>,
    capacity: usize,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Park a reading, overwriting the oldest when full
    pub fn enqueue(&mut self, reading: Reading) {
        if self.slots.len() == self.capacity {
            warn!("Offline queue full, dropping the oldest reading");
            self.slots.pop_front();
        }
        self.slots.push_back(QueueSlot {
            reading,
            pending: true,
        });
        debug!("Reading parked offline ({} queued)", self.slots.len());
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// In-order mutable walk; a flush pass marks delivered slots as it goes
    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut QueueSlot> {
        self.slots.iter_mut()
    }

    /// Drop the slots delivered during the last flush pass
    pub fn clear_delivered(&mut self) {
        self.slots.retain(|slot| slot.pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MotionFrame;

    fn reading(heart_rate: f64) -> Reading {
        Reading::new(
            "vigil-test",
            heart_rate,
            97.0,
            &MotionFrame::default(),
            0.0,
            0.0,
        )
    }

    #[test]
    fn test_overwrites_oldest_when_full() {
        let mut queue = OfflineQueue::new(5);
        for hr in 0..7 {
            queue.enqueue(reading(60.0 + hr as f64));
        }

        assert_eq!(queue.len(), 5);
        let rates: Vec<f64> = queue.slots_mut().map(|s| s.reading.heart_rate).collect();
        assert_eq!(rates, vec![62.0, 63.0, 64.0, 65.0, 66.0], "oldest two dropped, order kept");
    }

    #[test]
    fn test_clear_drops_only_delivered_slots() {
        let mut queue = OfflineQueue::new(5);
        for hr in 0..3 {
            queue.enqueue(reading(60.0 + hr as f64));
        }

        // Middle slot delivered, neighbors still pending
        for (i, slot) in queue.slots_mut().enumerate() {
            if i == 1 {
                slot.pending = false;
            }
        }
        queue.clear_delivered();

        assert_eq!(queue.len(), 2);
        let rates: Vec<f64> = queue.slots_mut().map(|s| s.reading.heart_rate).collect();
        assert_eq!(rates, vec![60.0, 62.0]);
    }

    #[test]
    fn test_empty_queue_is_empty() {
        let mut queue = OfflineQueue::new(5);
        assert!(queue.is_empty());
        queue.enqueue(reading(70.0));
        assert!(!queue.is_empty());
    }
}
