use colored::*;
use reqwest::Client;
use serde::Deserialize;
use std::error::Error;

#[derive(Debug, Deserialize)]
pub struct ProcessRow {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub threads: u32,
    pub status: String,
}

pub async fn run_processes(client: &Client, url: &str, limit: u32) -> Result<(), Box<dyn Error>> {
    let processes: Vec<ProcessRow> = client
        .get(format!("{url}/api/metrics/processes?limit={limit}"))
        .send()
        .await?
        .json()
        .await?;

    println!(
        "{:<8} {:<7} {:<9} {:<8} {:<10} NAME",
        "PID", "CPU%", "MEM_MB", "THREADS", "STATUS"
    );
    for p in processes {
        let cpu = format!("{:.1}", p.cpu_percent);
        let cpu_colored = if p.cpu_percent >= 50.0 {
            cpu.red()
        } else if p.cpu_percent >= 20.0 {
            cpu.yellow()
        } else {
            cpu.normal()
        };
        println!(
            "{:<8} {:<7} {:<9.1} {:<8} {:<10} {}",
            p.pid, cpu_colored, p.memory_mb, p.threads, p.status, p.name
        );
    }
    Ok(())
}
