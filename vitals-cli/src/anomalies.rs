use colored::*;
use reqwest::Client;
use serde::Deserialize;
use std::error::Error;

#[derive(Debug, Deserialize)]
struct Anomaly {
    timestamp: String,
    metric_name: String,
    current_value: f64,
    expected_value: f64,
    deviation_std: f64,
    severity: String,
}

pub async fn run_anomalies(client: &Client, url: &str, hours: u32) -> Result<(), Box<dyn Error>> {
    let anomalies: Vec<Anomaly> = client
        .get(format!("{url}/api/patterns/anomalies?hours={hours}"))
        .send()
        .await?
        .json()
        .await?;

    if anomalies.is_empty() {
        println!("{}", format!("No anomalies in the last {hours}h.").green());
        return Ok(());
    }

    println!(
        "{:<26} {:<16} {:<10} {:<10} {:<8} SEVERITY",
        "TIMESTAMP", "METRIC", "VALUE", "EXPECTED", "SIGMA"
    );
    for a in anomalies {
        let severity = match a.severity.as_str() {
            "critical" => a.severity.red().bold(),
            "warn" => a.severity.yellow(),
            _ => a.severity.normal(),
        };
        println!(
            "{:<26} {:<16} {:<10.2} {:<10.2} {:<8.2} {}",
            a.timestamp, a.metric_name, a.current_value, a.expected_value, a.deviation_std, severity
        );
    }
    Ok(())
}
