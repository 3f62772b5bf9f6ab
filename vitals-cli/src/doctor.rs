use colored::*;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::error::Error;

#[derive(Deserialize, Debug)]
struct HealthResponse {
    scheduler: String,
    store: String,
    ring_buffer: String,
    collectors: BTreeMap<String, CollectorHealth>,
    ticks_completed: u64,
    store_drops: u64,
    self_throttled: bool,
}

#[derive(Deserialize, Debug)]
struct CollectorHealth {
    last_success_ts: Option<String>,
    last_error: Option<String>,
    disabled: bool,
}

#[derive(Deserialize, Debug)]
struct TrainingResponse {
    samples: u64,
    minimum_required: u64,
    hours_collected: f64,
    minimum_hours: f64,
    ready: bool,
    progress_ratio: f64,
}

pub async fn run_doctor(client: &Client, url: &str) -> Result<(), Box<dyn Error>> {
    println!("{}", "vitals doctor".bold().cyan());
    println!("{}", "Checking agent health...".dimmed());
    println!();

    print!("• Agent Connectivity: ");
    let health: HealthResponse = match client.get(format!("{url}/health")).send().await {
        Ok(resp) if resp.status().is_success() => {
            let health = resp.json().await?;
            println!("{}", "OK".green());
            health
        }
        Ok(resp) => {
            println!("{}", format!("FAIL (Status {})", resp.status()).red());
            return Ok(());
        }
        Err(e) => {
            println!("{}", format!("FAIL ({e})").red());
            println!("  → Is vitalsd running? Try 'systemctl status vitalsd'");
            return Ok(());
        }
    };

    print!("• Scheduler:          ");
    println!("{}", status_colored(&health.scheduler));

    print!("• Store:              ");
    println!("{}", status_colored(&health.store));

    print!("• Ring Buffer:        ");
    if health.ring_buffer == "ok" {
        println!("{}", format!("ok ({} ticks)", health.ticks_completed).green());
    } else {
        println!("{}", health.ring_buffer.yellow());
    }

    print!("• Store Drops:        ");
    if health.store_drops > 0 {
        println!("{}", format!("{} (writer falling behind)", health.store_drops).yellow());
    } else {
        println!("{}", "0".green());
    }

    print!("• Self-Throttle:      ");
    if health.self_throttled {
        println!("{}", "ENGAGED (optional collectors shed)".yellow());
    } else {
        println!("{}", "inactive".green());
    }

    println!();
    println!("{}", "Collectors:".bold());
    for (name, collector) in &health.collectors {
        print!("  {name:<12} ");
        if collector.disabled {
            println!(
                "{}",
                format!(
                    "DISABLED ({})",
                    collector.last_error.as_deref().unwrap_or("unknown")
                )
                .red()
            );
        } else if let Some(error) = &collector.last_error {
            println!("{}", format!("ERROR ({error})").yellow());
        } else if collector.last_success_ts.is_some() {
            println!("{}", "ok".green());
        } else {
            println!("{}", "no samples yet".dimmed());
        }
    }

    println!();
    print!("• Training Data:      ");
    match client.get(format!("{url}/api/status/training")).send().await {
        Ok(resp) if resp.status().is_success() => {
            let training: TrainingResponse = resp.json().await?;
            if training.ready {
                println!(
                    "{}",
                    format!(
                        "ready ({} samples, {:.1}h)",
                        training.samples, training.hours_collected
                    )
                    .green()
                );
            } else {
                println!(
                    "{}",
                    format!(
                        "{:.0}% ({}/{} samples, {:.1}/{:.1}h)",
                        training.progress_ratio * 100.0,
                        training.samples,
                        training.minimum_required,
                        training.hours_collected,
                        training.minimum_hours
                    )
                    .yellow()
                );
            }
        }
        _ => println!("{}", "unavailable".dimmed()),
    }

    println!();
    let healthy = health.scheduler == "ok" && health.store == "ok";
    if healthy {
        println!("{}", "Agent is healthy.".bold().green());
    } else {
        println!("{}", "Agent has issues. See above.".bold().yellow());
    }
    Ok(())
}

fn status_colored(status: &str) -> ColoredString {
    match status {
        "ok" => status.green(),
        "degraded" => status.yellow(),
        _ => status.red(),
    }
}
