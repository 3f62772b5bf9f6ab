//! CPU collector
//!
//! Usage figures come from sysinfo's cumulative counters, so the first sample
//! after startup reads low; the value stabilizes from the second tick on.
//! Temperature is taken from the hwmon components list when the platform
//! exposes one and is absent otherwise.

use super::{remaining, Cadence, Collector, Failure};
use crate::models::{CpuMetrics, Fragment};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use sysinfo::{Components, CpuRefreshKind, RefreshKind, System};
use tokio::time::Instant;

pub struct CpuCollector {
    sys: Arc<Mutex<System>>,
}

impl CpuCollector {
    pub fn new() -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::new().with_cpu(CpuRefreshKind::everything()),
        );
        Self {
            sys: Arc::new(Mutex::new(sys)),
        }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for CpuCollector {
    fn name(&self) -> &'static str {
        "cpu"
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
            sys.refresh_cpu();

            let per_core_usage: Vec<f64> =
                sys.cpus().iter().map(|c| c.cpu_usage() as f64).collect();
            let logical_count = sys.cpus().len() as u32;
            let physical_count = sys
                .physical_core_count()
                .unwrap_or(logical_count as usize) as u32;
            let frequency_mhz = sys
                .cpus()
                .first()
                .map(|c| c.frequency() as f64)
                .filter(|f| *f > 0.0);
            let usage_percent = sys.global_cpu_info().cpu_usage() as f64;
            let load = System::load_average();

            CpuMetrics {
                usage_percent,
                frequency_mhz,
                per_core_usage,
                temperature_celsius: package_temperature(),
                logical_count,
                physical_count,
                load_average: Some([load.one, load.five, load.fifteen]),
            }
        })
        .await
        .map_err(|e| Failure::transient(format!("cpu sampling task failed: {e}")))?;

        if metrics.logical_count == 0 {
            return Err(Failure::unsupported("no cpus reported by the platform"));
        }
        Ok(Fragment::Cpu(metrics))
    }
}

/// Best-effort CPU package temperature. None when nothing plausible exists.
fn package_temperature() -> Option<f64> {
    let components = Components::new_with_refreshed_list();
    let mut fallback = None;
    for component in &components {
        let label = component.label().to_lowercase();
        let temp = component.temperature() as f64;
        if !(0.0..=150.0).contains(&temp) {
            continue;
        }
        if label.contains("package") || label.contains("tctl") {
            return Some(temp);
        }
        if fallback.is_none() && (label.contains("cpu") || label.contains("core")) {
            fallback = Some(temp);
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[tokio::test]
    async fn samples_a_cpu_fragment() {
        let collector = CpuCollector::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        let fragment = collector.sample(deadline).await.unwrap();
        match fragment {
            Fragment::Cpu(cpu) => {
                assert!(cpu.logical_count > 0);
                assert!(cpu.physical_count > 0);
                assert!(
                    cpu.per_core_usage.is_empty()
                        || cpu.per_core_usage.len() == cpu.logical_count as usize
                );
            }
            other => panic!("expected cpu fragment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_deadline_is_a_prompt_timeout() {
        let collector = CpuCollector::new();
        let deadline = Instant::now() - Duration::from_millis(1);
        let err = collector.sample(deadline).await.unwrap_err();
        assert_eq!(err.reason(), "timeout");
        // the collector is still usable afterwards
        let fragment = collector
            .sample(Instant::now() + Duration::from_secs(5))
            .await;
        assert!(fragment.is_ok());
    }
}
