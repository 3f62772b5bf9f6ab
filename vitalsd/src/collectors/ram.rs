//! RAM collector
//!
//! sysinfo covers totals and swap; the page-cache figure is read straight
//! from /proc/meminfo since sysinfo does not break it out.

use super::{remaining, Cadence, Collector, Failure};
use crate::models::{Fragment, RamMetrics};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tokio::time::Instant;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub struct RamCollector {
    sys: Arc<Mutex<System>>,
}

impl RamCollector {
    pub fn new() -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            sys: Arc::new(Mutex::new(sys)),
        }
    }
}

impl Default for RamCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for RamCollector {
    fn name(&self) -> &'static str {
        "ram"
    }

    fn cadence(&self) -> Cadence {
        Cadence::High
    }

    async fn sample(&self, deadline: Instant) -> Result<Fragment, Failure> {
        if remaining(deadline).is_zero() {
            return Err(Failure::timeout());
        }
        let sys = Arc::clone(&self.sys);
        let metrics = tokio::task::spawn_blocking(move || {
            let mut sys = sys.lock().unwrap();
            sys.refresh_memory();

            let total_gb = sys.total_memory() as f64 / BYTES_PER_GB;
            let used_gb = sys.used_memory() as f64 / BYTES_PER_GB;
            let available_gb = sys.available_memory() as f64 / BYTES_PER_GB;

            RamMetrics {
                total_gb,
                used_gb,
                available_gb,
                cached_gb: cached_gb().unwrap_or(0.0),
                swap_total_gb: sys.total_swap() as f64 / BYTES_PER_GB,
                swap_used_gb: sys.used_swap() as f64 / BYTES_PER_GB,
                usage_percent: None,
            }
        })
        .await
        .map_err(|e| Failure::transient(format!("ram sampling task failed: {e}")))?;

        if metrics.total_gb <= 0.0 {
            return Err(Failure::unsupported("platform reported zero total memory"));
        }
        Ok(Fragment::Ram(metrics))
    }
}

fn cached_gb() -> Option<f64> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_cached(&content)
}

/// Extract "Cached:" from /proc/meminfo, reported in kB.
fn parse_meminfo_cached(content: &str) -> Option<f64> {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("Cached:") {
            let kb: f64 = rest.split_whitespace().next()?.parse().ok()?;
            return Some(kb * 1024.0 / BYTES_PER_GB);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[test]
    fn parses_cached_line() {
        let content = "MemTotal:       16300000 kB\nCached:          4194304 kB\nSwapCached:            0 kB\n";
        let cached = parse_meminfo_cached(content).unwrap();
        assert!((cached - 4.0).abs() < 1e-9);
    }

    #[test]
    fn cached_missing_is_none() {
        assert_eq!(parse_meminfo_cached("MemTotal: 1 kB\n"), None);
    }

    #[tokio::test]
    async fn samples_a_ram_fragment() {
        let collector = RamCollector::new();
        let fragment = collector
            .sample(Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();
        match fragment {
            Fragment::Ram(ram) => {
                assert!(ram.total_gb > 0.0);
                assert!(ram.used_gb >= 0.0);
                assert!(ram.usage_percent.is_none(), "derivation is the normalizer's job");
            }
            other => panic!("expected ram fragment, got {other:?}"),
        }
    }
}
