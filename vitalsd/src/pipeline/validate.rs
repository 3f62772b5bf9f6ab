//! Fragment validation
//!
//! Applies the per-fragment range invariants after normalization. A failing
//! fragment is dropped from the snapshot and its collector recorded with an
//! invalid_range reason. Validation never looks across fragments.

use crate::models::{CpuMetrics, DiskMetrics, GpuMetrics, NetworkMetrics, ProcessInfo, RamMetrics};

/// 5% accounting slack for used + available vs total.
const RAM_SLACK: f64 = 1.05;

type ValidationResult = Result<(), String>;

fn reject(field: &str) -> ValidationResult {
    Err(format!("invalid_range:{field}"))
}

pub fn validate_cpu(cpu: &CpuMetrics) -> ValidationResult {
    if !(0.0..=100.0).contains(&cpu.usage_percent) {
        return reject("usage_percent");
    }
    if let Some(freq) = cpu.frequency_mhz {
        if freq <= 0.0 {
            return reject("frequency_mhz");
        }
    }
    if !cpu.per_core_usage.is_empty() && cpu.per_core_usage.len() != cpu.logical_count as usize {
        return reject("per_core_usage");
    }
    if cpu.per_core_usage.iter().any(|u| !(0.0..=100.0).contains(u)) {
        return reject("per_core_usage");
    }
    if let Some(temp) = cpu.temperature_celsius {
        if !(0.0..=150.0).contains(&temp) {
            return reject("temperature_celsius");
        }
    }
    if cpu.logical_count == 0 {
        return reject("logical_count");
    }
    if cpu.physical_count == 0 {
        return reject("physical_count");
    }
    Ok(())
}

pub fn validate_ram(ram: &RamMetrics) -> ValidationResult {
    if ram.total_gb <= 0.0 {
        return reject("total_gb");
    }
    for (field, value) in [
        ("used_gb", ram.used_gb),
        ("available_gb", ram.available_gb),
        ("cached_gb", ram.cached_gb),
        ("swap_total_gb", ram.swap_total_gb),
        ("swap_used_gb", ram.swap_used_gb),
    ] {
        if value < 0.0 {
            return reject(field);
        }
    }
    if ram.used_gb + ram.available_gb > ram.total_gb * RAM_SLACK {
        return reject("used_gb");
    }
    Ok(())
}

pub fn validate_gpus(gpus: &[GpuMetrics]) -> ValidationResult {
    for gpu in gpus {
        if !(0.0..=100.0).contains(&gpu.usage_percent) {
            return reject("usage_percent");
        }
        if gpu.memory_used_gb > gpu.memory_total_gb {
            return reject("memory_used_gb");
        }
        if gpu.fan_rpm.is_some_and(|rpm| rpm < 0.0) {
            return reject("fan_rpm");
        }
        if gpu.power_watts.is_some_and(|w| w < 0.0) {
            return reject("power_watts");
        }
    }
    Ok(())
}

pub fn validate_disk(disk: &DiskMetrics) -> ValidationResult {
    for (field, value) in [
        ("read_mbps", disk.read_mbps),
        ("write_mbps", disk.write_mbps),
        ("queue_length", disk.queue_length),
        ("io_ops_per_sec", disk.io_ops_per_sec),
    ] {
        if value < 0.0 {
            return reject(field);
        }
    }
    for device in &disk.disks {
        if !(0.0..=100.0).contains(&device.usage_percent) {
            return reject("usage_percent");
        }
        if device.total_gb < 0.0 || device.used_gb < 0.0 || device.free_gb < 0.0 {
            return reject("total_gb");
        }
    }
    Ok(())
}

pub fn validate_network(network: &NetworkMetrics) -> ValidationResult {
    if network.download_mbps < 0.0 {
        return reject("download_mbps");
    }
    if network.upload_mbps < 0.0 {
        return reject("upload_mbps");
    }
    Ok(())
}

pub fn validate_processes(processes: &[ProcessInfo]) -> ValidationResult {
    for process in processes {
        if process.cpu_percent < 0.0 {
            return reject("cpu_percent");
        }
        if process.memory_mb < 0.0 {
            return reject("memory_mb");
        }
    }
    Ok(())
}
