//! In-memory ring buffer of recent snapshots
//!
//! One publisher (the pipeline), many readers. Live subscribers get a
//! bounded broadcast queue; a subscriber that falls behind is cut loose
//! with a slow_consumer notice instead of stalling the publisher.

use crate::models::Snapshot;
use log::warn;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub struct RingBuffer {
    inner: Mutex<VecDeque<Arc<Snapshot>>>,
    capacity: usize,
    tx: broadcast::Sender<Arc<Snapshot>>,
}

/// A live feed of new snapshots. `recv` yields `None` once the subscriber
/// has lagged past its queue and been disconnected.
pub struct Subscription {
    rx: broadcast::Receiver<Arc<Snapshot>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        match self.rx.recv().await {
            Ok(snapshot) => Some(snapshot),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("[ring] dropping subscriber: slow_consumer missed={missed}");
                None
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

impl RingBuffer {
    pub fn new(capacity: usize, subscriber_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(subscriber_capacity.max(1));
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            tx,
        }
    }

    /// O(1), non-blocking. Overwrites the oldest entry when full.
    pub fn publish(&self, snapshot: Arc<Snapshot>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.len() == self.capacity {
                inner.pop_front();
            }
            inner.push_back(Arc::clone(&snapshot));
        }
        // no receivers is fine
        let _ = self.tx.send(snapshot);
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.inner.lock().unwrap().back().cloned()
    }

    /// Up to `n` most recent snapshots, oldest first.
    pub fn window(&self, n: usize) -> Vec<Arc<Snapshot>> {
        let inner = self.inner.lock().unwrap();
        let skip = inner.len().saturating_sub(n);
        inner.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn snapshot(ms: i64) -> Arc<Snapshot> {
        Arc::new(Snapshot {
            timestamp: Utc.timestamp_millis_opt(ms).unwrap(),
            cpu: None,
            ram: None,
            gpu: None,
            disk: None,
            network: None,
            processes: None,
            context: None,
            collection_duration_ms: 0,
            collector_errors: BTreeMap::new(),
        })
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let ring = RingBuffer::new(3, 8);
        for ms in 0..5 {
            ring.publish(snapshot(ms));
        }
        assert_eq!(ring.len(), 3);
        let window = ring.window(10);
        let times: Vec<i64> = window.iter().map(|s| s.timestamp.timestamp_millis()).collect();
        assert_eq!(times, [2, 3, 4]);
        assert_eq!(ring.latest().unwrap().timestamp.timestamp_millis(), 4);
    }

    #[test]
    fn window_is_chronological_and_bounded() {
        let ring = RingBuffer::new(10, 8);
        for ms in 0..6 {
            ring.publish(snapshot(ms));
        }
        let window = ring.window(3);
        let times: Vec<i64> = window.iter().map(|s| s.timestamp.timestamp_millis()).collect();
        assert_eq!(times, [3, 4, 5]);
    }

    #[test]
    fn empty_ring_has_no_latest() {
        let ring = RingBuffer::new(4, 8);
        assert!(ring.latest().is_none());
        assert!(ring.is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_snapshots_in_publish_order() {
        let ring = RingBuffer::new(16, 16);
        let mut sub = ring.subscribe();
        for ms in 0..4 {
            ring.publish(snapshot(ms));
        }
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(sub.recv().await.unwrap().timestamp.timestamp_millis());
        }
        assert_eq!(seen, [0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn lagged_subscriber_is_disconnected() {
        let ring = RingBuffer::new(64, 2);
        let mut sub = ring.subscribe();
        for ms in 0..10 {
            ring.publish(snapshot(ms));
        }
        // the queue only held 2; the subscriber lagged and is dropped
        assert!(sub.recv().await.is_none());
    }
}
