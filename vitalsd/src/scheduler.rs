//! Multi-rate scheduler
//!
//! Drives the pipeline on the HIGH heartbeat; every Nth beat is elevated to
//! MEDIUM or LOW so slower collector families piggyback on one tick rather
//! than producing overlapping snapshots. A separate VERY_LOW clock runs the
//! baseline persistence and retention sweep. A resource watchdog sheds the
//! optional collectors when the agent itself overruns its RSS/CPU caps.

use crate::collectors::{Cadence, Registry};
use crate::config::Config;
use crate::health::Health;
use crate::patterns::PatternEngine;
use crate::pipeline::Pipeline;
use crate::store::Store;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use sysinfo::{Pid, System};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, interval_at, Duration, Instant, MissedTickBehavior};

const WATCHDOG_PERIOD: Duration = Duration::from_secs(10);

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    patterns: Arc<PatternEngine>,
    store: Arc<Store>,
    registry: Arc<Registry>,
    health: Arc<Health>,
    config: Arc<Config>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        patterns: Arc<PatternEngine>,
        store: Arc<Store>,
        registry: Arc<Registry>,
        health: Arc<Health>,
        config: Arc<Config>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pipeline,
            patterns,
            store,
            registry,
            health,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let c = &self.config.collection;
        let medium_every = (c.medium_interval_sec / c.high_interval_sec).max(1);
        let low_every = (c.low_interval_sec / c.high_interval_sec).max(1);

        let mut heartbeat = interval(Duration::from_secs(c.high_interval_sec));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let very_low_period = Duration::from_secs(c.very_low_interval_sec);
        let mut maintenance = interval_at(Instant::now() + very_low_period, very_low_period);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watchdog = interval(WATCHDOG_PERIOD);

        let mut tick_tasks: JoinSet<()> = JoinSet::new();
        let mut beat: u64 = 0;
        let mut watchdog_sys = System::new();
        let mut overrun = Duration::ZERO;
        let mut throttled = false;

        self.health.set_scheduler_ok(true);
        info!(
            "[scheduler] started: high={}s medium={}s low={}s very_low={}s",
            c.high_interval_sec, c.medium_interval_sec, c.low_interval_sec, c.very_low_interval_sec
        );

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let cadence = cadence_for(beat, medium_every, low_every);
                    beat += 1;
                    let interval_sec = match cadence {
                        Cadence::High => c.high_interval_sec,
                        Cadence::Medium => c.medium_interval_sec,
                        Cadence::Low => c.low_interval_sec,
                    };
                    let pipeline = Arc::clone(&self.pipeline);
                    tick_tasks.spawn(async move {
                        pipeline.run_tick(cadence, interval_sec).await;
                    });
                }
                _ = maintenance.tick() => {
                    self.patterns.persist_baselines().await;
                    match self.store.retention_sweep(Utc::now()).await {
                        Ok(report) => debug!(
                            "[scheduler] retention sweep: {} snapshots, {} anomalies removed",
                            report.snapshots_deleted, report.anomalies_deleted
                        ),
                        Err(e) => warn!("[scheduler] retention sweep failed: {e}"),
                    }
                }
                _ = watchdog.tick() => {
                    self.check_resources(&mut watchdog_sys, &mut overrun, &mut throttled);
                }
                Some(result) = tick_tasks.join_next(), if !tick_tasks.is_empty() => {
                    if let Err(e) = result {
                        warn!("[scheduler] tick task failed: {e}");
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // stop issuing ticks, give in-flight ones the drain budget, then cut
        let drain = Duration::from_secs(self.config.limits.drain_budget_sec);
        info!("[scheduler] draining in-flight ticks (budget {drain:?})");
        let drained = tokio::time::timeout(drain, async {
            while tick_tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("[scheduler] drain budget exhausted, aborting unfinished ticks");
            tick_tasks.abort_all();
        }
        self.health.set_scheduler_ok(false);
        info!("[scheduler] stopped after {beat} tick(s)");
    }

    /// Track own RSS and CPU against the configured caps. Sustained overrun
    /// sheds the optional collectors once per session.
    fn check_resources(&self, sys: &mut System, overrun: &mut Duration, throttled: &mut bool) {
        let pid = Pid::from_u32(std::process::id());
        if !sys.refresh_process(pid) {
            return;
        }
        let Some(process) = sys.process(pid) else {
            return;
        };
        let rss_mb = process.memory() / (1024 * 1024);
        let cpu_percent = process.cpu_usage() as f64;
        let limits = &self.config.limits;

        if rss_mb > limits.max_rss_mb || cpu_percent > limits.max_cpu_percent {
            *overrun += WATCHDOG_PERIOD;
        } else {
            *overrun = Duration::ZERO;
        }

        if !*throttled && *overrun >= Duration::from_secs(limits.overrun_grace_sec) {
            *throttled = true;
            let shed = self.registry.shed_optional();
            self.health.mark_self_throttled();
            for name in &shed {
                self.health.mark_collector_disabled(name);
            }
            warn!(
                "[scheduler] self_throttle rss_mb={rss_mb} cpu_percent={cpu_percent:.1} shed={shed:?}"
            );
        }
    }
}

/// Beat 0 (startup) runs everything so the first snapshot is complete.
fn cadence_for(beat: u64, medium_every: u64, low_every: u64) -> Cadence {
    if beat % low_every == 0 {
        Cadence::Low
    } else if beat % medium_every == 0 {
        Cadence::Medium
    } else {
        Cadence::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{Collector, Failure};
    use crate::config::StoreConfig;
    use crate::models::{Fragment, RamMetrics};
    use crate::pipeline::{run_store_writer, WriteQueue};
    use crate::ring::RingBuffer;
    use async_trait::async_trait;
    use tempfile::TempDir;

    #[test]
    fn cadence_ladder() {
        // high=3s, medium=15s, low=60s -> every 5th beat medium, every 20th low
        assert_eq!(cadence_for(0, 5, 20), Cadence::Low);
        assert_eq!(cadence_for(1, 5, 20), Cadence::High);
        assert_eq!(cadence_for(5, 5, 20), Cadence::Medium);
        assert_eq!(cadence_for(10, 5, 20), Cadence::Medium);
        assert_eq!(cadence_for(20, 5, 20), Cadence::Low);
        assert_eq!(cadence_for(21, 5, 20), Cadence::High);
    }

    struct RamStub;

    #[async_trait]
    impl Collector for RamStub {
        fn name(&self) -> &'static str {
            "ram"
        }

        fn cadence(&self) -> Cadence {
            Cadence::High
        }

        async fn sample(&self, _deadline: Instant) -> Result<Fragment, Failure> {
            Ok(Fragment::Ram(RamMetrics {
                total_gb: 8.0,
                used_gb: 2.0,
                available_gb: 6.0,
                cached_gb: 0.0,
                swap_total_gb: 0.0,
                swap_used_gb: 0.0,
                usage_percent: None,
            }))
        }
    }

    #[tokio::test]
    async fn runs_ticks_and_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.collection.high_interval_sec = 1;
        config.collection.medium_interval_sec = 1;
        config.collection.low_interval_sec = 1;
        config.collection.very_low_interval_sec = 3600;
        config.store.path = dir.path().join("sched.db");
        let config = Arc::new(config);

        let store = Arc::new(Store::open(&config.store).await.unwrap());
        let registry = Arc::new(Registry::from_collectors(vec![Arc::new(RamStub)]));
        let ring = Arc::new(RingBuffer::new(16, 16));
        let health = Arc::new(Health::new(5));
        let queue = Arc::new(WriteQueue::new(16));
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&registry),
            Arc::clone(&ring),
            Arc::clone(&health),
            Arc::clone(&config),
            Arc::clone(&queue),
        ));
        let patterns = Arc::new(PatternEngine::new(
            Arc::clone(&store),
            config.patterns.clone(),
        ));
        let writer = tokio::spawn(run_store_writer(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&health),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = Scheduler::new(
            pipeline,
            patterns,
            Arc::clone(&store),
            registry,
            Arc::clone(&health),
            Arc::clone(&config),
            shutdown_rx,
        );
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("scheduler should stop within the drain budget")
            .unwrap();

        queue.close();
        tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .expect("writer should drain")
            .unwrap();

        assert!(ring.latest().is_some(), "at least one tick ran");
        let persisted = store.recent(10).await.unwrap();
        assert!(!persisted.is_empty(), "snapshots reached the store");
        assert_eq!(health.report().scheduler, "stopped");
    }
}
