use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vitalsd::collectors::Registry;
use vitalsd::config::{Config, LoggingConfig};
use vitalsd::health::Health;
use vitalsd::http::{self, AppState};
use vitalsd::patterns::PatternEngine;
use vitalsd::pipeline::{run_store_writer, Pipeline, WriteQueue};
use vitalsd::ring::RingBuffer;
use vitalsd::scheduler::Scheduler;
use vitalsd::store::Store;

const EXIT_CONFIG: i32 = 1;
const EXIT_STORE: i32 = 2;
const EXIT_BIND: i32 = 3;
const EXIT_INTERRUPT: i32 = 130;

/// Snapshots waiting for the store writer before the oldest gets dropped.
const WRITE_QUEUE_DEPTH: usize = 64;

#[derive(Parser, Debug)]
#[clap(name = "vitalsd", version, about = "Host-local system telemetry agent")]
struct Args {
    /// Path to a TOML config file
    #[clap(long)]
    config: Option<PathBuf>,

    /// Override the HTTP bind address
    #[clap(long)]
    bind: Option<SocketAddr>,

    /// Override the database path
    #[clap(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let args = Args::parse();

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return EXIT_CONFIG;
        }
    };
    if let Some(bind) = args.bind {
        config.http.bind = bind;
    }
    if let Some(db) = args.db {
        config.store.path = db;
    }

    let _log_guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("configuration error: cannot set up logging: {e}");
            return EXIT_CONFIG;
        }
    };
    info!("vitalsd {} starting", env!("CARGO_PKG_VERSION"));
    let config = Arc::new(config);

    let store = match Store::open(&config.store).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("storage initialization failed: {e}");
            return EXIT_STORE;
        }
    };

    let listener = match TcpListener::bind(config.http.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {e}", config.http.bind);
            store.close().await;
            return EXIT_BIND;
        }
    };

    let health = Arc::new(Health::new(config.store.write_failure_threshold));
    let ring = Arc::new(RingBuffer::new(
        config.ring.capacity,
        config.ring.subscriber_capacity,
    ));
    let registry = Arc::new(Registry::from_config(&config));
    let write_queue = Arc::new(WriteQueue::new(WRITE_QUEUE_DEPTH));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&registry),
        Arc::clone(&ring),
        Arc::clone(&health),
        Arc::clone(&config),
        Arc::clone(&write_queue),
    ));
    let patterns = Arc::new(PatternEngine::new(
        Arc::clone(&store),
        config.patterns.clone(),
    ));
    patterns.warm_start().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let writer_task = tokio::spawn(run_store_writer(
        Arc::clone(&store),
        Arc::clone(&write_queue),
        Arc::clone(&health),
    ));
    let patterns_task = tokio::spawn(Arc::clone(&patterns).run(ring.subscribe()));
    let scheduler = Scheduler::new(
        pipeline,
        Arc::clone(&patterns),
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&health),
        Arc::clone(&config),
        shutdown_rx.clone(),
    );
    let scheduler_task = tokio::spawn(scheduler.run());
    let http_task = tokio::spawn(http::serve(
        AppState {
            ring: Arc::clone(&ring),
            store: Arc::clone(&store),
            health: Arc::clone(&health),
            config: Arc::clone(&config),
        },
        listener,
        shutdown_rx,
    ));

    let interrupted = tokio::signal::ctrl_c().await.is_ok();
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // scheduler stops issuing ticks and drains, then the writer flushes its
    // backlog, then HTTP stops accepting; the store closes last
    let grace = std::time::Duration::from_secs(config.limits.shutdown_grace_sec);
    let orderly = async {
        let _ = scheduler_task.await;
        write_queue.close();
        let _ = writer_task.await;
        if let Ok(Err(e)) = http_task.await {
            warn!("http server ended with error: {e}");
        }
    };
    if tokio::time::timeout(grace, orderly).await.is_err() {
        warn!("shutdown grace of {grace:?} exceeded, forcing exit");
    }
    patterns_task.abort();
    store.close().await;
    info!("vitalsd stopped");

    if interrupted {
        EXIT_INTERRUPT
    } else {
        0
    }
}

/// Structured logs to stderr, plus an optional file sink. The file honors
/// `logging.rotate_mb` by rotating an oversized previous log aside at
/// startup; `log` facade records from worker code are captured through the
/// tracing bridge.
fn init_logging(
    logging: &LoggingConfig,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use anyhow::Context;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));
    let registry = tracing_subscriber::registry().with(filter);

    match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating log directory for {}", path.display()))?;
                }
            }
            rotate_oversized(path, logging.rotate_mb);
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "vitalsd.log".to_string());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(fmt::layer().with_target(true))
                .init();
            Ok(Some(guard))
        }
        None => {
            registry.with(fmt::layer().with_target(true)).init();
            Ok(None)
        }
    }
}

fn rotate_oversized(path: &std::path::Path, rotate_mb: u64) {
    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };
    if metadata.len() > rotate_mb.max(1) * 1024 * 1024 {
        let rotated = path.with_extension("log.1");
        if let Err(e) = std::fs::rename(path, &rotated) {
            eprintln!("could not rotate oversized log {}: {e}", path.display());
        }
    }
}
