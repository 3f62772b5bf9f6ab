//! GPU collector
//!
//! Queries nvidia-smi in CSV mode. A missing binary is a permanent
//! missing_dependency failure, which makes the registry retire this
//! collector for the session on GPU-less hosts.

use super::{remaining, Cadence, Collector, Failure};
use crate::models::{Fragment, GpuMetrics};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;

const QUERY_FIELDS: &str = "name,utilization.gpu,memory.used,memory.total,temperature.gpu,power.draw,clocks.sm,clocks.mem";

pub struct GpuCollector;

impl GpuCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for GpuCollector {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Low
    }

    async fn sample(&self, deadline: Instant) -> Result<Fragment, Failure> {
        let budget = remaining(deadline);
        if budget.is_zero() {
            return Err(Failure::timeout());
        }

        let output = tokio::time::timeout(
            budget,
            Command::new("nvidia-smi")
                .arg(format!("--query-gpu={QUERY_FIELDS}"))
                .arg("--format=csv,noheader,nounits")
                .output(),
        )
        .await
        .map_err(|_| Failure::timeout())?;

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Failure::missing_dependency("nvidia-smi not found"));
            }
            Err(e) => return Err(Failure::transient(format!("nvidia-smi spawn failed: {e}"))),
        };

        if !output.status.success() {
            // nvidia-smi exists but no device is usable
            return Err(Failure::unsupported(format!(
                "nvidia-smi exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let gpus = parse_csv(&stdout)?;
        if gpus.is_empty() {
            return Err(Failure::unsupported("nvidia-smi reported no devices"));
        }
        Ok(Fragment::Gpu(gpus))
    }
}

fn parse_csv(stdout: &str) -> Result<Vec<GpuMetrics>, Failure> {
    let mut gpus = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 8 {
            return Err(Failure::transient(format!(
                "unexpected nvidia-smi line: {line}"
            )));
        }
        gpus.push(GpuMetrics {
            name: parts[0].to_string(),
            usage_percent: field(parts[1]).unwrap_or(0.0),
            memory_used_gb: field(parts[2]).map(mib_to_gb).unwrap_or(0.0),
            memory_total_gb: field(parts[3]).map(mib_to_gb).unwrap_or(0.0),
            temperature_celsius: field(parts[4]),
            fan_rpm: None,
            power_watts: field(parts[5]),
            core_clock_mhz: field(parts[6]),
            memory_clock_mhz: field(parts[7]),
        });
    }
    Ok(gpus)
}

/// nvidia-smi prints "N/A" or "[N/A]" for fields a device does not support.
fn field(raw: &str) -> Option<f64> {
    let raw = raw.trim_matches(|c| c == '[' || c == ']');
    if raw.eq_ignore_ascii_case("n/a") {
        return None;
    }
    raw.parse().ok()
}

fn mib_to_gb(mib: f64) -> f64 {
    mib / 1024.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_devices() {
        let stdout = "NVIDIA GeForce RTX 3080, 45, 2048, 10240, 61, 220.5, 1710, 9501\n\
                      NVIDIA GeForce GTX 1650, 3, 512, 4096, N/A, [N/A], 300, 4001\n";
        let gpus = parse_csv(stdout).unwrap();
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].name, "NVIDIA GeForce RTX 3080");
        assert_eq!(gpus[0].usage_percent, 45.0);
        assert!((gpus[0].memory_used_gb - 2.0).abs() < 1e-9);
        assert!((gpus[0].memory_total_gb - 10.0).abs() < 1e-9);
        assert_eq!(gpus[0].temperature_celsius, Some(61.0));
        assert_eq!(gpus[1].temperature_celsius, None);
        assert_eq!(gpus[1].power_watts, None);
    }

    #[test]
    fn malformed_line_is_transient() {
        let err = parse_csv("garbage\n").unwrap_err();
        assert_eq!(err.reason(), "transient_error");
    }

    #[test]
    fn empty_output_parses_to_no_devices() {
        assert!(parse_csv("").unwrap().is_empty());
    }
}
