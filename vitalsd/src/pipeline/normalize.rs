//! Fragment normalization
//!
//! Pure functions run between collection and validation: clamp percentages,
//! derive trivially computable fields, fix list ordering, round to stable
//! precision. Unit coercion to GB/MHz/MB-per-second happens in the
//! collectors; this pass only cleans up what they produced.

use crate::models::{sort_processes, CpuMetrics, DiskMetrics, GpuMetrics, NetworkMetrics, ProcessInfo, RamMetrics};

pub fn clamp_percent(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn normalize_cpu(cpu: &mut CpuMetrics) {
    cpu.usage_percent = round2(clamp_percent(cpu.usage_percent));
    for core in &mut cpu.per_core_usage {
        *core = round2(clamp_percent(*core));
    }
}

pub fn normalize_ram(ram: &mut RamMetrics) {
    if ram.usage_percent.is_none() && ram.total_gb > 0.0 {
        ram.usage_percent = Some(ram.used_gb / ram.total_gb * 100.0);
    }
    ram.usage_percent = ram.usage_percent.map(|p| round2(clamp_percent(p)));
    ram.total_gb = round2(ram.total_gb);
    ram.used_gb = round2(ram.used_gb);
    ram.available_gb = round2(ram.available_gb);
    ram.cached_gb = round2(ram.cached_gb);
    ram.swap_total_gb = round2(ram.swap_total_gb);
    ram.swap_used_gb = round2(ram.swap_used_gb);
}

/// GPUs keep their device order; only values are cleaned.
pub fn normalize_gpus(gpus: &mut [GpuMetrics]) {
    for gpu in gpus {
        gpu.usage_percent = round2(clamp_percent(gpu.usage_percent));
        gpu.memory_used_gb = round2(gpu.memory_used_gb);
        gpu.memory_total_gb = round2(gpu.memory_total_gb);
    }
}

pub fn normalize_disk(disk: &mut DiskMetrics) {
    disk.read_mbps = round2(disk.read_mbps.max(0.0));
    disk.write_mbps = round2(disk.write_mbps.max(0.0));
    disk.io_ops_per_sec = round2(disk.io_ops_per_sec.max(0.0));
    for device in &mut disk.disks {
        device.usage_percent = round2(clamp_percent(device.usage_percent));
        device.total_gb = round2(device.total_gb);
        device.used_gb = round2(device.used_gb);
        device.free_gb = round2(device.free_gb);
    }
    disk.disks.sort_by(|a, b| a.device.cmp(&b.device));
}

pub fn normalize_network(network: &mut NetworkMetrics) {
    network.download_mbps = round2(network.download_mbps.max(0.0));
    network.upload_mbps = round2(network.upload_mbps.max(0.0));
    network.interfaces.sort_by(|a, b| a.name.cmp(&b.name));
}

pub fn normalize_processes(processes: &mut Vec<ProcessInfo>, top_n: usize) {
    for process in processes.iter_mut() {
        process.cpu_percent = round2(process.cpu_percent.max(0.0));
        process.memory_mb = round2(process.memory_mb.max(0.0));
    }
    sort_processes(processes);
    processes.truncate(top_n);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DiskDevice;

    #[test]
    fn derives_ram_usage_percent() {
        let mut ram = RamMetrics {
            total_gb: 16.0,
            used_gb: 4.0,
            available_gb: 11.5,
            cached_gb: 0.5,
            swap_total_gb: 0.0,
            swap_used_gb: 0.0,
            usage_percent: None,
        };
        normalize_ram(&mut ram);
        assert_eq!(ram.usage_percent, Some(25.0));
    }

    #[test]
    fn keeps_existing_ram_usage_percent() {
        let mut ram = RamMetrics {
            total_gb: 16.0,
            used_gb: 4.0,
            available_gb: 11.5,
            cached_gb: 0.5,
            swap_total_gb: 0.0,
            swap_used_gb: 0.0,
            usage_percent: Some(26.137),
        };
        normalize_ram(&mut ram);
        assert_eq!(ram.usage_percent, Some(26.14));
    }

    #[test]
    fn clamps_out_of_range_percentages() {
        let mut cpu = CpuMetrics {
            usage_percent: 104.3,
            frequency_mhz: None,
            per_core_usage: vec![-2.0, 50.0, 101.0],
            temperature_celsius: None,
            logical_count: 3,
            physical_count: 3,
            load_average: None,
        };
        normalize_cpu(&mut cpu);
        assert_eq!(cpu.usage_percent, 100.0);
        assert_eq!(cpu.per_core_usage, vec![0.0, 50.0, 100.0]);
    }

    #[test]
    fn sorts_disks_by_device_name() {
        let device = |name: &str| DiskDevice {
            device: name.to_string(),
            total_gb: 100.0,
            used_gb: 50.0,
            free_gb: 50.0,
            usage_percent: 50.0,
        };
        let mut disk = DiskMetrics {
            read_mbps: 0.0,
            write_mbps: 0.0,
            queue_length: 0.0,
            io_ops_per_sec: 0.0,
            disks: vec![device("sdb"), device("nvme0n1"), device("sda")],
            warming_up: false,
        };
        normalize_disk(&mut disk);
        let names: Vec<&str> = disk.disks.iter().map(|d| d.device.as_str()).collect();
        assert_eq!(names, ["nvme0n1", "sda", "sdb"]);
    }

    #[test]
    fn truncates_processes_to_top_n() {
        let mut processes: Vec<ProcessInfo> = (0..20)
            .map(|i| ProcessInfo {
                name: format!("p{i}"),
                pid: i,
                cpu_percent: i as f64,
                memory_mb: 10.0,
                thread_count: 1,
                status: "running".to_string(),
                started_at: None,
            })
            .collect();
        normalize_processes(&mut processes, 5);
        assert_eq!(processes.len(), 5);
        assert_eq!(processes[0].name, "p19");
    }
}
