//! Network collector
//!
//! Rates are first differences of the interface counters over wall time.
//! Loopback is excluded from the aggregate. Link state and speed come from
//! /sys/class/net; the established-connection count from /proc/net/tcp{,6}.

use super::{remaining, Cadence, Collector, Failure};
use crate::models::{Fragment, NetworkInterface, NetworkMetrics};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use sysinfo::Networks;
use tokio::time::Instant;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Counters {
    bytes_received: u64,
    bytes_sent: u64,
    packets_received: u64,
    packets_sent: u64,
    errors: u64,
}

#[derive(Debug, Clone, Copy)]
struct DeltaState {
    counters: Counters,
    at: Instant,
}

pub struct NetworkCollector {
    last: Arc<Mutex<Option<DeltaState>>>,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for NetworkCollector {
    fn name(&self) -> &'static str {
        "network"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Medium
    }

    async fn sample(&self, deadline: Instant) -> Result<Fragment, Failure> {
        if remaining(deadline).is_zero() {
            return Err(Failure::timeout());
        }
        let last = Arc::clone(&self.last);
        let metrics = tokio::task::spawn_blocking(move || {
            let networks = Networks::new_with_refreshed_list();
            let mut counters = Counters::default();
            let mut interfaces = Vec::new();
            for (name, data) in &networks {
                if name == "lo" {
                    continue;
                }
                counters.bytes_received += data.total_received();
                counters.bytes_sent += data.total_transmitted();
                counters.packets_received += data.total_packets_received();
                counters.packets_sent += data.total_packets_transmitted();
                counters.errors +=
                    data.total_errors_on_received() + data.total_errors_on_transmitted();
                interfaces.push(interface_facts(name));
            }
            interfaces.sort_by(|a: &NetworkInterface, b: &NetworkInterface| a.name.cmp(&b.name));

            let now = Instant::now();
            let mut last = last.lock().unwrap();
            let (download_mbps, upload_mbps, warming_up) = match *last {
                Some(prev) => rates(prev, counters, now),
                None => (0.0, 0.0, true),
            };
            *last = Some(DeltaState { counters, at: now });

            NetworkMetrics {
                download_mbps,
                upload_mbps,
                connections_active: established_connections(),
                bytes_sent: counters.bytes_sent,
                bytes_received: counters.bytes_received,
                packets_sent: counters.packets_sent,
                packets_received: counters.packets_received,
                errors: counters.errors,
                interfaces,
                warming_up,
            }
        })
        .await
        .map_err(|e| Failure::transient(format!("network sampling task failed: {e}")))?;

        Ok(Fragment::Network(metrics))
    }
}

fn rates(prev: DeltaState, current: Counters, now: Instant) -> (f64, f64, bool) {
    let elapsed = now.duration_since(prev.at).as_secs_f64().max(0.001);
    // wraparound or interface reset: report zero for this interval
    if current.bytes_received < prev.counters.bytes_received
        || current.bytes_sent < prev.counters.bytes_sent
    {
        return (0.0, 0.0, false);
    }
    let down = (current.bytes_received - prev.counters.bytes_received) as f64 / elapsed / BYTES_PER_MB;
    let up = (current.bytes_sent - prev.counters.bytes_sent) as f64 / elapsed / BYTES_PER_MB;
    (down, up, false)
}

fn interface_facts(name: &str) -> NetworkInterface {
    let base = Path::new("/sys/class/net").join(name);
    let is_up = std::fs::read_to_string(base.join("operstate"))
        .map(|s| s.trim() == "up")
        .unwrap_or(false);
    // virtual interfaces have no speed file, wireless ones report -1
    let speed_mbps = std::fs::read_to_string(base.join("speed"))
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|speed| *speed > 0.0);
    NetworkInterface {
        name: name.to_string(),
        speed_mbps,
        is_up,
    }
}

fn established_connections() -> u32 {
    let mut count = 0;
    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(content) = std::fs::read_to_string(path) {
            count += count_established(&content);
        }
    }
    count
}

/// Connection state is the fourth column; 01 is ESTABLISHED.
fn count_established(content: &str) -> u32 {
    content
        .lines()
        .skip(1)
        .filter(|line| {
            line.split_whitespace()
                .nth(3)
                .map(|st| st == "01")
                .unwrap_or(false)
        })
        .count() as u32
}
