//! Disk collector
//!
//! Space figures come from sysinfo's mounted-disk list; throughput and queue
//! depth come from /proc/diskstats deltas between consecutive samples. The
//! first sample reports zero rates with the warming_up flag set; a counter
//! that moves backwards (device reset) also yields zero and restarts the
//! delta state.

use super::{remaining, Cadence, Collector, Failure};
use crate::models::{DiskDevice, DiskMetrics, Fragment};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use sysinfo::Disks;
use tokio::time::Instant;

const SECTOR_BYTES: u64 = 512;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct IoCounters {
    read_bytes: u64,
    write_bytes: u64,
    ops: u64,
    in_flight: u64,
}

#[derive(Debug, Clone, Copy)]
struct DeltaState {
    counters: IoCounters,
    at: Instant,
}

pub struct DiskCollector {
    last: Arc<Mutex<Option<DeltaState>>>,
}

impl DiskCollector {
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for DiskCollector {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Medium
    }

    async fn sample(&self, deadline: Instant) -> Result<Fragment, Failure> {
        if remaining(deadline).is_zero() {
            return Err(Failure::timeout());
        }
        let last = Arc::clone(&self.last);
        let metrics = tokio::task::spawn_blocking(move || -> Result<DiskMetrics, Failure> {
            let content = std::fs::read_to_string("/proc/diskstats")
                .map_err(|e| Failure::unsupported(format!("cannot read /proc/diskstats: {e}")))?;
            let counters = parse_diskstats(&content);
            let now = Instant::now();

            let mut last = last.lock().unwrap();
            let (read_mbps, write_mbps, io_ops_per_sec, warming_up) = match *last {
                Some(prev) => rates(prev, counters, now),
                None => (0.0, 0.0, 0.0, true),
            };
            *last = Some(DeltaState { counters, at: now });

            Ok(DiskMetrics {
                read_mbps,
                write_mbps,
                queue_length: counters.in_flight as f64,
                io_ops_per_sec,
                disks: mounted_disks(),
                warming_up,
            })
        })
        .await
        .map_err(|e| Failure::transient(format!("disk sampling task failed: {e}")))??;

        Ok(Fragment::Disk(metrics))
    }
}

fn rates(prev: DeltaState, current: IoCounters, now: Instant) -> (f64, f64, f64, bool) {
    let elapsed = now.duration_since(prev.at).as_secs_f64().max(0.001);
    // counter regression means a device reset; report zero and start over
    if current.read_bytes < prev.counters.read_bytes
        || current.write_bytes < prev.counters.write_bytes
        || current.ops < prev.counters.ops
    {
        return (0.0, 0.0, 0.0, false);
    }
    let read_mbps = (current.read_bytes - prev.counters.read_bytes) as f64 / elapsed / BYTES_PER_MB;
    let write_mbps =
        (current.write_bytes - prev.counters.write_bytes) as f64 / elapsed / BYTES_PER_MB;
    let ops = (current.ops - prev.counters.ops) as f64 / elapsed;
    (read_mbps, write_mbps, ops, false)
}

/// Aggregate /proc/diskstats over whole physical devices.
///
/// Line layout: major minor name reads _ sectors_read _ writes _ sectors_written _ in_flight ...
fn parse_diskstats(content: &str) -> IoCounters {
    let mut total = IoCounters {
        read_bytes: 0,
        write_bytes: 0,
        ops: 0,
        in_flight: 0,
    };
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 12 {
            continue;
        }
        let name = fields[2];
        if !is_physical_device(name) {
            continue;
        }
        let get = |idx: usize| fields[idx].parse::<u64>().unwrap_or(0);
        total.ops += get(3) + get(7);
        total.read_bytes += get(5) * SECTOR_BYTES;
        total.write_bytes += get(9) * SECTOR_BYTES;
        total.in_flight += get(11);
    }
    total
}

/// Whole-disk entries only: partitions and virtual devices are skipped so
/// the aggregate does not double-count.
fn is_physical_device(name: &str) -> bool {
    for prefix in ["loop", "ram", "zram", "dm-", "md", "sr", "fd"] {
        if name.starts_with(prefix) {
            return false;
        }
    }
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        // nvme0n1 is a disk, nvme0n1p1 a partition
        return !name
            .char_indices()
            .any(|(i, c)| c == 'p' && i > 0 && name.as_bytes()[i - 1].is_ascii_digit());
    }
    // sda is a disk, sda1 a partition
    !name.ends_with(|c: char| c.is_ascii_digit())
}

fn mounted_disks() -> Vec<DiskDevice> {
    let disks = Disks::new_with_refreshed_list();
    let mut devices: Vec<DiskDevice> = Vec::new();
    for disk in &disks {
        let device = disk.name().to_string_lossy().to_string();
        if devices.iter().any(|d| d.device == device) {
            continue;
        }
        let total = disk.total_space();
        if total == 0 {
            continue;
        }
        let free = disk.available_space();
        let used = total.saturating_sub(free);
        devices.push(DiskDevice {
            device,
            total_gb: total as f64 / BYTES_PER_GB,
            used_gb: used as f64 / BYTES_PER_GB,
            free_gb: free as f64 / BYTES_PER_GB,
            usage_percent: used as f64 / total as f64 * 100.0,
        });
    }
    devices
}
