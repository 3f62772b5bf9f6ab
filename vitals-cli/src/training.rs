use colored::*;
use reqwest::Client;
use serde::Deserialize;
use std::error::Error;

#[derive(Debug, Deserialize)]
struct TrainingStatus {
    samples: u64,
    minimum_required: u64,
    hours_collected: f64,
    minimum_hours: f64,
    ready: bool,
    progress_ratio: f64,
    next_steps: Vec<String>,
}

pub async fn run_training(client: &Client, url: &str) -> Result<(), Box<dyn Error>> {
    let status: TrainingStatus = client
        .get(format!("{url}/api/status/training"))
        .send()
        .await?
        .json()
        .await?;

    let bar_width = 30usize;
    let filled = (status.progress_ratio * bar_width as f64).round() as usize;
    let bar = format!(
        "[{}{}]",
        "#".repeat(filled),
        "-".repeat(bar_width - filled.min(bar_width))
    );

    println!("{}", "training readiness".bold());
    println!(
        "  {} {:.0}%",
        if status.ready { bar.green() } else { bar.yellow() },
        status.progress_ratio * 100.0
    );
    println!(
        "  samples  {}/{}",
        status.samples, status.minimum_required
    );
    println!(
        "  hours    {:.1}/{:.1}",
        status.hours_collected, status.minimum_hours
    );
    println!();
    for step in &status.next_steps {
        println!("  → {step}");
    }
    Ok(())
}
