use colored::*;
use reqwest::Client;
use serde::Deserialize;
use std::error::Error;

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    timestamp: String,
    cpu: Option<Cpu>,
    ram: Option<Ram>,
    gpu: Option<Vec<Gpu>>,
    disk: Option<Disk>,
    network: Option<Network>,
    #[serde(default)]
    collector_errors: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Cpu {
    usage_percent: f64,
    frequency_mhz: Option<f64>,
    temperature_celsius: Option<f64>,
    logical_count: u32,
}

#[derive(Debug, Deserialize)]
struct Ram {
    total_gb: f64,
    used_gb: f64,
    usage_percent: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Gpu {
    name: String,
    usage_percent: f64,
    memory_used_gb: f64,
    memory_total_gb: f64,
}

#[derive(Debug, Deserialize)]
struct Disk {
    read_mbps: f64,
    write_mbps: f64,
}

#[derive(Debug, Deserialize)]
struct Network {
    download_mbps: f64,
    upload_mbps: f64,
    connections_active: u32,
}

pub async fn run_current(client: &Client, url: &str) -> Result<(), Box<dyn Error>> {
    let resp = client.get(format!("{url}/api/metrics/current")).send().await?;
    if resp.status().as_u16() == 503 {
        println!("{}", "No data yet: the agent has not completed a tick.".yellow());
        return Ok(());
    }
    let current: CurrentResponse = resp.json().await?;

    println!("{} {}", "snapshot".bold(), current.timestamp.dimmed());
    if let Some(cpu) = &current.cpu {
        let freq = cpu
            .frequency_mhz
            .map(|f| format!(" @ {f:.0} MHz"))
            .unwrap_or_default();
        let temp = cpu
            .temperature_celsius
            .map(|t| format!(", {t:.0}°C"))
            .unwrap_or_default();
        println!(
            "  cpu      {}%{} ({} cores{})",
            pct(cpu.usage_percent),
            freq,
            cpu.logical_count,
            temp
        );
    }
    if let Some(ram) = &current.ram {
        println!(
            "  ram      {}% ({:.1}/{:.1} GB)",
            pct(ram.usage_percent.unwrap_or(0.0)),
            ram.used_gb,
            ram.total_gb
        );
    }
    if let Some(gpus) = &current.gpu {
        for gpu in gpus {
            println!(
                "  gpu      {}% {} ({:.1}/{:.1} GB)",
                pct(gpu.usage_percent),
                gpu.name,
                gpu.memory_used_gb,
                gpu.memory_total_gb
            );
        }
    }
    if let Some(disk) = &current.disk {
        println!(
            "  disk     read {:.1} MB/s, write {:.1} MB/s",
            disk.read_mbps, disk.write_mbps
        );
    }
    if let Some(network) = &current.network {
        println!(
            "  network  down {:.2} MB/s, up {:.2} MB/s, {} connections",
            network.download_mbps, network.upload_mbps, network.connections_active
        );
    }
    if !current.collector_errors.is_empty() {
        println!();
        for (collector, reason) in &current.collector_errors {
            println!("  {} {collector}: {reason}", "!".yellow());
        }
    }
    Ok(())
}

fn pct(value: f64) -> ColoredString {
    let text = format!("{value:.1}");
    if value >= 90.0 {
        text.red()
    } else if value >= 70.0 {
        text.yellow()
    } else {
        text.green()
    }
}
