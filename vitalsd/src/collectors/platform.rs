//! Platform query bridge
//!
//! Reads temperature and fan sensors from the kernel hwmon tree. Readings
//! are folded into the cpu/gpu fragments by the pipeline; they never form a
//! fragment of their own.
//!
//! Layout per device directory:
//!   /sys/class/hwmon/hwmonN/name          driver name
//!   /sys/class/hwmon/hwmonN/temp1_input   millidegrees C
//!   /sys/class/hwmon/hwmonN/temp1_label   optional label
//!   /sys/class/hwmon/hwmonN/fan1_input    RPM

use super::{remaining, Cadence, Collector, Failure};
use crate::models::{Fragment, SensorReading};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::time::Instant;

pub struct PlatformCollector {
    hwmon_root: PathBuf,
}

impl PlatformCollector {
    pub fn new(hwmon_root: PathBuf) -> Self {
        Self { hwmon_root }
    }
}

#[async_trait]
impl Collector for PlatformCollector {
    fn name(&self) -> &'static str {
        "platform"
    }

    fn cadence(&self) -> Cadence {
        Cadence::High
    }

    async fn sample(&self, deadline: Instant) -> Result<Fragment, Failure> {
        if remaining(deadline).is_zero() {
            return Err(Failure::timeout());
        }
        let root = self.hwmon_root.clone();
        let readings = tokio::task::spawn_blocking(move || read_hwmon_tree(&root))
            .await
            .map_err(|e| Failure::transient(format!("hwmon sampling task failed: {e}")))??;
        Ok(Fragment::Sensors(readings))
    }
}

fn read_hwmon_tree(root: &Path) -> Result<Vec<SensorReading>, Failure> {
    let entries = std::fs::read_dir(root)
        .map_err(|e| Failure::unsupported(format!("no hwmon tree at {}: {e}", root.display())))?;

    let mut readings = Vec::new();
    for entry in entries.flatten() {
        let dir = entry.path();
        let driver = read_trimmed(&dir.join("name")).unwrap_or_else(|| "hwmon".to_string());
        for idx in 1..=8 {
            if let Some(milli) = read_trimmed(&dir.join(format!("temp{idx}_input")))
                .and_then(|s| s.parse::<f64>().ok())
            {
                let label = read_trimmed(&dir.join(format!("temp{idx}_label")))
                    .unwrap_or_else(|| format!("{driver} temp{idx}"));
                readings.push(SensorReading {
                    label,
                    temperature_celsius: Some(milli / 1000.0),
                    fan_rpm: None,
                });
            }
            if let Some(rpm) = read_trimmed(&dir.join(format!("fan{idx}_input")))
                .and_then(|s| s.parse::<f64>().ok())
            {
                readings.push(SensorReading {
                    label: format!("{driver} fan{idx}"),
                    temperature_celsius: None,
                    fan_rpm: Some(rpm),
                });
            }
        }
    }
    Ok(readings)
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reads_a_synthetic_hwmon_tree() {
        let root = tempfile::tempdir().unwrap();
        let device = root.path().join("hwmon0");
        fs::create_dir(&device).unwrap();
        fs::write(device.join("name"), "coretemp\n").unwrap();
        fs::write(device.join("temp1_input"), "45500\n").unwrap();
        fs::write(device.join("temp1_label"), "Package id 0\n").unwrap();
        fs::write(device.join("fan1_input"), "1280\n").unwrap();

        let readings = read_hwmon_tree(root.path()).unwrap();
        assert_eq!(readings.len(), 2);
        let temp = readings
            .iter()
            .find(|r| r.temperature_celsius.is_some())
            .unwrap();
        assert_eq!(temp.label, "Package id 0");
        assert_eq!(temp.temperature_celsius, Some(45.5));
        let fan = readings.iter().find(|r| r.fan_rpm.is_some()).unwrap();
        assert_eq!(fan.fan_rpm, Some(1280.0));
    }

    #[test]
    fn missing_tree_is_unsupported() {
        let err = read_hwmon_tree(Path::new("/nonexistent/hwmon")).unwrap_err();
        assert_eq!(err.reason(), "unsupported");
    }
}
