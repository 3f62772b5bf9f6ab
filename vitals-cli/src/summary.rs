use colored::*;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;

#[derive(Debug, Deserialize)]
struct SummaryStats {
    avg: f64,
    min: f64,
    max: f64,
    p95: f64,
}

pub async fn run_summary(client: &Client, url: &str, window: u32) -> Result<(), Box<dyn Error>> {
    let summary: BTreeMap<String, SummaryStats> = client
        .get(format!("{url}/api/metrics/summary?window={window}"))
        .send()
        .await?
        .json()
        .await?;

    if summary.is_empty() {
        println!("{}", format!("No data in the last {window}h.").yellow());
        return Ok(());
    }

    println!("{} (last {window}h)", "summary".bold());
    println!(
        "{:<16} {:>9} {:>9} {:>9} {:>9}",
        "METRIC", "AVG", "MIN", "MAX", "P95"
    );
    for (metric, stats) in summary {
        println!(
            "{:<16} {:>9.2} {:>9.2} {:>9.2} {:>9.2}",
            metric, stats.avg, stats.min, stats.max, stats.p95
        );
    }
    Ok(())
}
