//! Snapshot data model
//!
//! A snapshot is the complete sampled state for one timestamp. Each collector
//! family contributes one optional typed fragment; a fragment missing from a
//! tick is `None`, never zero-filled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram: Option<RamMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<Vec<GpuMetrics>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<Vec<ProcessInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<SystemContext>,
    pub collection_duration_ms: u32,
    pub collector_errors: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn has_any_fragment(&self) -> bool {
        self.cpu.is_some()
            || self.ram.is_some()
            || self.gpu.is_some()
            || self.disk.is_some()
            || self.network.is_some()
            || self.processes.is_some()
            || self.context.is_some()
    }

    /// Value of a primary metric in this snapshot, if the fragment is present.
    pub fn metric_value(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::CpuPercent => self.cpu.as_ref().map(|c| c.usage_percent),
            MetricKind::RamPercent => self.ram.as_ref().and_then(|r| r.usage_percent),
            MetricKind::GpuPercent => self.gpu.as_ref().and_then(|gpus| {
                if gpus.is_empty() {
                    None
                } else {
                    let sum: f64 = gpus.iter().map(|g| g.usage_percent).sum();
                    Some(sum / gpus.len() as f64)
                }
            }),
            MetricKind::DiskReadMbps => self.disk.as_ref().map(|d| d.read_mbps),
            MetricKind::DiskWriteMbps => self.disk.as_ref().map(|d| d.write_mbps),
            MetricKind::NetDownMbps => self.network.as_ref().map(|n| n.download_mbps),
            MetricKind::NetUpMbps => self.network.as_ref().map(|n| n.upload_mbps),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub usage_percent: f64,
    pub frequency_mhz: Option<f64>,
    pub per_core_usage: Vec<f64>,
    pub temperature_celsius: Option<f64>,
    pub logical_count: u32,
    pub physical_count: u32,
    pub load_average: Option<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RamMetrics {
    pub total_gb: f64,
    pub used_gb: f64,
    pub available_gb: f64,
    pub cached_gb: f64,
    pub swap_total_gb: f64,
    pub swap_used_gb: f64,
    /// Derived from used/total by the normalizer when the platform omits it.
    pub usage_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuMetrics {
    pub name: String,
    pub usage_percent: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub temperature_celsius: Option<f64>,
    pub fan_rpm: Option<f64>,
    pub power_watts: Option<f64>,
    pub core_clock_mhz: Option<f64>,
    pub memory_clock_mhz: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub read_mbps: f64,
    pub write_mbps: f64,
    pub queue_length: f64,
    pub io_ops_per_sec: f64,
    pub disks: Vec<DiskDevice>,
    pub warming_up: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskDevice {
    pub device: String,
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub connections_active: u32,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub errors: u64,
    pub interfaces: Vec<NetworkInterface>,
    pub warming_up: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub speed_mbps: Option<f64>,
    pub is_up: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub pid: u32,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub thread_count: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemContext {
    pub user_active: bool,
    pub idle_seconds: u64,
    pub screen_locked: bool,
    pub time_of_day: TimeOfDay,
    pub day_of_week: String,
    pub user_action: UserAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=20 => Self::Evening,
            _ => Self::Night,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAction {
    Coding,
    Gaming,
    Browsing,
    Streaming,
    Idle,
    Unknown,
}

/// One reading from a sensor bridge collector. Never persisted on its own;
/// the pipeline folds readings into the cpu/gpu fragments of the same tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_celsius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_rpm: Option<f64>,
}

/// Typed payload returned by one collector for one tick.
#[derive(Debug, Clone)]
pub enum Fragment {
    Cpu(CpuMetrics),
    Ram(RamMetrics),
    Gpu(Vec<GpuMetrics>),
    Disk(DiskMetrics),
    Network(NetworkMetrics),
    Processes(Vec<ProcessInfo>),
    Context(SystemContext),
    Sensors(Vec<SensorReading>),
}

/// The primary per-metric time series exposed by history/patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    CpuPercent,
    RamPercent,
    GpuPercent,
    DiskReadMbps,
    DiskWriteMbps,
    NetDownMbps,
    NetUpMbps,
}

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::CpuPercent,
        MetricKind::RamPercent,
        MetricKind::GpuPercent,
        MetricKind::DiskReadMbps,
        MetricKind::DiskWriteMbps,
        MetricKind::NetDownMbps,
        MetricKind::NetUpMbps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuPercent => "cpu_percent",
            Self::RamPercent => "ram_percent",
            Self::GpuPercent => "gpu_percent",
            Self::DiskReadMbps => "disk_read_mbps",
            Self::DiskWriteMbps => "disk_write_mbps",
            Self::NetDownMbps => "net_down_mbps",
            Self::NetUpMbps => "net_up_mbps",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == s)
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// A detected baseline/threshold/spike event. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub current_value: f64,
    pub expected_value: f64,
    pub deviation_std: f64,
    pub severity: Severity,
    #[serde(rename = "context_json")]
    pub context: serde_json::Value,
}

/// Sort processes for display and storage: cpu descending, ties broken by
/// higher memory, then name ascending.
pub fn sort_processes(processes: &mut [ProcessInfo]) {
    processes.sort_by(|a, b| {
        b.cpu_percent
            .partial_cmp(&a.cpu_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.memory_mb
                    .partial_cmp(&a.memory_mb)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(name: &str, cpu: f64, mem: f64) -> ProcessInfo {
        ProcessInfo {
            name: name.to_string(),
            pid: 1,
            cpu_percent: cpu,
            memory_mb: mem,
            thread_count: 1,
            status: "running".to_string(),
            started_at: None,
        }
    }

    #[test]
    fn process_ordering_rule() {
        let mut procs = vec![
            proc("b", 10.0, 100.0),
            proc("a", 10.0, 100.0),
            proc("c", 10.0, 200.0),
            proc("d", 50.0, 10.0),
        ];
        sort_processes(&mut procs);
        let names: Vec<&str> = procs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["d", "c", "a", "b"]);
    }

    #[test]
    fn time_of_day_buckets() {
        assert_eq!(TimeOfDay::from_hour(6), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(12), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(18), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(23), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(3), TimeOfDay::Night);
    }

    #[test]
    fn metric_kind_round_trips_names() {
        for kind in MetricKind::ALL {
            assert_eq!(MetricKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MetricKind::parse("bogus"), None);
    }

    #[test]
    fn gpu_percent_averages_devices() {
        let snapshot = Snapshot {
            timestamp: Utc::now(),
            cpu: None,
            ram: None,
            gpu: Some(vec![
                GpuMetrics {
                    name: "gpu0".to_string(),
                    usage_percent: 40.0,
                    memory_used_gb: 1.0,
                    memory_total_gb: 8.0,
                    temperature_celsius: None,
                    fan_rpm: None,
                    power_watts: None,
                    core_clock_mhz: None,
                    memory_clock_mhz: None,
                },
                GpuMetrics {
                    name: "gpu1".to_string(),
                    usage_percent: 60.0,
                    memory_used_gb: 1.0,
                    memory_total_gb: 8.0,
                    temperature_celsius: None,
                    fan_rpm: None,
                    power_watts: None,
                    core_clock_mhz: None,
                    memory_clock_mhz: None,
                },
            ]),
            disk: None,
            network: None,
            processes: None,
            context: None,
            collection_duration_ms: 0,
            collector_errors: BTreeMap::new(),
        };
        assert_eq!(snapshot.metric_value(MetricKind::GpuPercent), Some(50.0));
        assert_eq!(snapshot.metric_value(MetricKind::CpuPercent), None);
    }
}
