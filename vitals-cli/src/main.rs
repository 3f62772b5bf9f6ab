use clap::{Parser, Subcommand};
use reqwest::Client;
use std::error::Error;

mod anomalies;
mod current;
mod doctor;
mod processes;
mod summary;
mod training;

#[derive(clap::Parser, Debug)]
struct Args {
    /// Base URL of the vitalsd service
    #[clap(long, default_value = "http://127.0.0.1:8001")]
    url: String,

    /// Disable colorized output
    #[clap(long)]
    no_color: bool,

    /// Subcommands
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Check agent health and connectivity
    Doctor,
    /// Show the latest snapshot
    Current,
    /// List the top processes from the latest snapshot
    Processes {
        /// Maximum number of processes to show
        #[clap(long, default_value_t = 15)]
        limit: u32,
    },
    /// List detected anomalies
    Anomalies {
        /// Time window to query, in hours
        #[clap(long, default_value_t = 24)]
        hours: u32,
    },
    /// Per-metric statistics over a trailing window
    Summary {
        /// Window in hours
        #[clap(long, default_value_t = 1)]
        window: u32,
    },
    /// Show data-collection progress toward training readiness
    Training,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    if args.no_color {
        colored::control::set_override(false);
    }
    let client = Client::new();

    match args.command.unwrap_or(Command::Current) {
        Command::Doctor => doctor::run_doctor(&client, &args.url).await?,
        Command::Current => current::run_current(&client, &args.url).await?,
        Command::Processes { limit } => {
            processes::run_processes(&client, &args.url, limit).await?
        }
        Command::Anomalies { hours } => {
            anomalies::run_anomalies(&client, &args.url, hours).await?
        }
        Command::Summary { window } => summary::run_summary(&client, &args.url, window).await?,
        Command::Training => training::run_training(&client, &args.url).await?,
    }
    Ok(())
}
