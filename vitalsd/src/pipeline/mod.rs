//! Sampling pipeline
//!
//! One tick: fan out to every enabled collector with a shared deadline, join
//! the results, normalize, validate, assemble a snapshot and hand it to the
//! store writer queue (bounded, drop-oldest) and the ring buffer. A tick
//! never raises; every failure ends up in the snapshot's error map or the
//! log.

pub mod normalize;
pub mod validate;

use crate::collectors::{Cadence, Failure, Registry};
use crate::config::Config;
use crate::health::Health;
use crate::models::{
    CpuMetrics, DiskMetrics, Fragment, GpuMetrics, NetworkMetrics, ProcessInfo, RamMetrics,
    SensorReading, Snapshot, SystemContext,
};
use crate::ring::RingBuffer;
use crate::store::Store;
use chrono::{TimeZone, Utc};
use log::{debug, info, warn};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Bounded in-flight queue between the pipeline and the store writer task.
/// When the writer cannot keep up the oldest unwritten snapshot is dropped;
/// live readers still see it via the ring buffer.
pub struct WriteQueue {
    inner: Mutex<VecDeque<Arc<Snapshot>>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl WriteQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns true when an older snapshot had to be dropped to make room.
    pub fn push(&self, snapshot: Arc<Snapshot>) -> bool {
        let dropped = {
            let mut inner = self.inner.lock().unwrap();
            let dropped = if inner.len() == self.capacity {
                inner.pop_front();
                true
            } else {
                false
            };
            inner.push_back(snapshot);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Next snapshot to write; None once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Arc<Snapshot>> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(snapshot) = inner.pop_front() {
                    return Some(snapshot);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// Collected fragments for one tick, keyed implicitly by family.
#[derive(Default)]
struct TickFragments {
    cpu: Option<CpuMetrics>,
    ram: Option<RamMetrics>,
    gpu: Option<Vec<GpuMetrics>>,
    disk: Option<DiskMetrics>,
    network: Option<NetworkMetrics>,
    processes: Option<Vec<ProcessInfo>>,
    context: Option<SystemContext>,
    sensors: Vec<SensorReading>,
}

impl TickFragments {
    fn insert(&mut self, fragment: Fragment) {
        match fragment {
            Fragment::Cpu(cpu) => self.cpu = Some(cpu),
            Fragment::Ram(ram) => self.ram = Some(ram),
            Fragment::Gpu(gpu) => self.gpu = Some(gpu),
            Fragment::Disk(disk) => self.disk = Some(disk),
            Fragment::Network(network) => self.network = Some(network),
            Fragment::Processes(processes) => self.processes = Some(processes),
            Fragment::Context(context) => self.context = Some(context),
            Fragment::Sensors(readings) => self.sensors.extend(readings),
        }
    }

    /// Fold sensor-bridge readings into the fragments they describe. The
    /// primary collectors win; bridges only fill gaps.
    fn fold_sensors(&mut self) {
        if self.sensors.is_empty() {
            return;
        }
        if let Some(cpu) = self.cpu.as_mut() {
            if cpu.temperature_celsius.is_none() {
                cpu.temperature_celsius = self
                    .sensors
                    .iter()
                    .filter(|r| {
                        let label = r.label.to_lowercase();
                        label.contains("package")
                            || label.contains("tctl")
                            || label.contains("cpu")
                            || label.contains("core")
                    })
                    .find_map(|r| r.temperature_celsius)
                    .filter(|t| (0.0..=150.0).contains(t));
            }
        }
        if let Some(gpus) = self.gpu.as_mut() {
            if let [gpu] = gpus.as_mut_slice() {
                if gpu.fan_rpm.is_none() {
                    gpu.fan_rpm = self
                        .sensors
                        .iter()
                        .find_map(|r| r.fan_rpm)
                        .filter(|rpm| *rpm >= 0.0);
                }
            }
        }
    }

    fn normalize(&mut self, process_top_n: usize) {
        if let Some(cpu) = self.cpu.as_mut() {
            normalize::normalize_cpu(cpu);
        }
        if let Some(ram) = self.ram.as_mut() {
            normalize::normalize_ram(ram);
        }
        if let Some(gpus) = self.gpu.as_mut() {
            normalize::normalize_gpus(gpus);
        }
        if let Some(disk) = self.disk.as_mut() {
            normalize::normalize_disk(disk);
        }
        if let Some(network) = self.network.as_mut() {
            normalize::normalize_network(network);
        }
        if let Some(processes) = self.processes.as_mut() {
            normalize::normalize_processes(processes, process_top_n);
        }
    }

    /// Drop fragments that fail their range invariants, recording the
    /// collector with the offending field.
    fn validate(&mut self, errors: &mut BTreeMap<String, String>) {
        if let Some(cpu) = &self.cpu {
            if let Err(reason) = validate::validate_cpu(cpu) {
                errors.insert("cpu".to_string(), reason);
                self.cpu = None;
            }
        }
        if let Some(ram) = &self.ram {
            if let Err(reason) = validate::validate_ram(ram) {
                errors.insert("ram".to_string(), reason);
                self.ram = None;
            }
        }
        if let Some(gpus) = &self.gpu {
            if let Err(reason) = validate::validate_gpus(gpus) {
                errors.insert("gpu".to_string(), reason);
                self.gpu = None;
            }
        }
        if let Some(disk) = &self.disk {
            if let Err(reason) = validate::validate_disk(disk) {
                errors.insert("disk".to_string(), reason);
                self.disk = None;
            }
        }
        if let Some(network) = &self.network {
            if let Err(reason) = validate::validate_network(network) {
                errors.insert("network".to_string(), reason);
                self.network = None;
            }
        }
        if let Some(processes) = &self.processes {
            if let Err(reason) = validate::validate_processes(processes) {
                errors.insert("process".to_string(), reason);
                self.processes = None;
            }
        }
    }
}

pub struct Pipeline {
    registry: Arc<Registry>,
    ring: Arc<RingBuffer>,
    health: Arc<Health>,
    config: Arc<Config>,
    write_queue: Arc<WriteQueue>,
    last_timestamp_ms: Mutex<Option<i64>>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<Registry>,
        ring: Arc<RingBuffer>,
        health: Arc<Health>,
        config: Arc<Config>,
        write_queue: Arc<WriteQueue>,
    ) -> Self {
        Self {
            registry,
            ring,
            health,
            config,
            write_queue,
            last_timestamp_ms: Mutex::new(None),
        }
    }

    /// Run one tick at the given rate class. Never fails; collector trouble
    /// lands in the snapshot's error map.
    pub async fn run_tick(&self, cadence: Cadence, interval_sec: u64) {
        let tick_start = Instant::now();
        let deadline = tick_start + self.config.tick_budget(interval_sec);

        let collectors = self.registry.enabled_for(cadence);
        if collectors.is_empty() {
            debug!("[pipeline] no enabled collectors for {cadence:?} tick");
            return;
        }

        let mut join_set = JoinSet::new();
        for collector in collectors {
            join_set.spawn(async move {
                let name = collector.name();
                let result = match tokio::time::timeout_at(deadline, collector.sample(deadline))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Failure::timeout()),
                };
                (name, result)
            });
        }

        let mut fragments = TickFragments::default();
        let mut errors: BTreeMap<String, String> = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(fragment))) => {
                    self.health.record_collector_success(name);
                    fragments.insert(fragment);
                }
                Ok((name, Err(failure))) => {
                    debug!("[pipeline] collector {name} failed: {failure}");
                    errors.insert(name.to_string(), failure.reason());
                    self.health.record_collector_error(name, &failure.reason());
                    if failure.kind.is_permanent() {
                        self.registry.disable(name, failure.kind.as_str());
                        self.health.mark_collector_disabled(name);
                    }
                }
                Err(e) => warn!("[pipeline] collector task panicked: {e}"),
            }
        }

        fragments.fold_sensors();
        fragments.normalize(self.config.collectors.process_top_n);
        fragments.validate(&mut errors);

        let Some(timestamp_ms) = self.next_timestamp() else {
            warn!("[pipeline] clock moved backwards, discarding tick");
            return;
        };

        let snapshot = Snapshot {
            timestamp: Utc
                .timestamp_millis_opt(timestamp_ms)
                .single()
                .unwrap_or_else(Utc::now),
            cpu: fragments.cpu,
            ram: fragments.ram,
            gpu: fragments.gpu,
            disk: fragments.disk,
            network: fragments.network,
            processes: fragments.processes,
            context: fragments.context,
            collection_duration_ms: tick_start.elapsed().as_millis().min(10_000) as u32,
            collector_errors: errors,
        };

        if !snapshot.has_any_fragment() {
            warn!("[pipeline] every collector failed, snapshot discarded");
            return;
        }

        let snapshot = Arc::new(snapshot);
        if self.write_queue.push(Arc::clone(&snapshot)) {
            self.health.record_store_drop();
            warn!("[pipeline] store queue saturated, dropped oldest unwritten snapshot");
        }
        self.ring.publish(snapshot);
        self.health.record_tick();
    }

    /// Strictly monotonic timestamps: equal stamps bump by 1 ms, a clock
    /// running backwards rejects the tick.
    fn next_timestamp(&self) -> Option<i64> {
        let now_ms = Utc::now().timestamp_millis();
        let mut last = self.last_timestamp_ms.lock().unwrap();
        let next = match *last {
            Some(prev) if now_ms < prev => return None,
            Some(prev) if now_ms == prev => prev + 1,
            _ => now_ms,
        };
        *last = Some(next);
        Some(next)
    }
}

/// Store writer: drains the queue in FIFO order so snapshots persist in
/// strictly increasing timestamp order. Exits once the queue closes and the
/// backlog is flushed.
pub async fn run_store_writer(store: Arc<Store>, queue: Arc<WriteQueue>, health: Arc<Health>) {
    info!("[pipeline] store writer started");
    while let Some(snapshot) = queue.pop().await {
        match store.write(&snapshot).await {
            Ok(_) => health.record_store_ok(),
            Err(e) => {
                warn!("[pipeline] store write failed: {e}");
                if health.record_store_failure() {
                    warn!("[pipeline] store entered degraded mode");
                }
            }
        }
    }
    info!("[pipeline] store writer drained, exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{Cadence, Collector, FailureKind};
    use crate::models::RamMetrics;
    use async_trait::async_trait;
    use tokio::time::Duration;

    struct StubCollector {
        name: &'static str,
        behavior: Behavior,
    }

    enum Behavior {
        Ram(f64),
        Context,
        SleepForever,
        Fail(FailureKind),
        InvalidRam,
    }

    #[async_trait]
    impl Collector for StubCollector {
        fn name(&self) -> &'static str {
            self.name
        }

        fn cadence(&self) -> Cadence {
            Cadence::High
        }

        async fn sample(&self, _deadline: Instant) -> Result<Fragment, Failure> {
            match &self.behavior {
                Behavior::Ram(used) => Ok(Fragment::Ram(RamMetrics {
                    total_gb: 16.0,
                    used_gb: *used,
                    available_gb: 16.0 - used,
                    cached_gb: 0.0,
                    swap_total_gb: 0.0,
                    swap_used_gb: 0.0,
                    usage_percent: None,
                })),
                Behavior::Context => Ok(Fragment::Context(crate::models::SystemContext {
                    user_active: false,
                    idle_seconds: 0,
                    screen_locked: false,
                    time_of_day: crate::models::TimeOfDay::Night,
                    day_of_week: "Monday".to_string(),
                    user_action: crate::models::UserAction::Unknown,
                })),
                Behavior::SleepForever => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(Failure::transient("unreachable"))
                }
                Behavior::Fail(kind) => Err(Failure::new(*kind, "stub failure")),
                Behavior::InvalidRam => Ok(Fragment::Ram(RamMetrics {
                    total_gb: -1.0,
                    used_gb: 0.0,
                    available_gb: 0.0,
                    cached_gb: 0.0,
                    swap_total_gb: 0.0,
                    swap_used_gb: 0.0,
                    usage_percent: None,
                })),
            }
        }
    }

    fn pipeline_with(collectors: Vec<Arc<dyn Collector>>) -> (Pipeline, Arc<RingBuffer>, Arc<WriteQueue>, Arc<Registry>) {
        let registry = Arc::new(Registry::from_collectors(collectors));
        let ring = Arc::new(RingBuffer::new(16, 16));
        let health = Arc::new(Health::new(5));
        let queue = Arc::new(WriteQueue::new(8));
        let mut config = Config::default();
        config.collection.high_interval_sec = 1;
        let pipeline = Pipeline::new(
            Arc::clone(&registry),
            Arc::clone(&ring),
            health,
            Arc::new(config),
            Arc::clone(&queue),
        );
        (pipeline, ring, queue, registry)
    }

    #[tokio::test]
    async fn tick_assembles_and_publishes_a_snapshot() {
        let (pipeline, ring, queue, _) = pipeline_with(vec![Arc::new(StubCollector {
            name: "ram",
            behavior: Behavior::Ram(8.0),
        })]);
        pipeline.run_tick(Cadence::High, 1).await;

        let latest = ring.latest().expect("snapshot should be in the ring");
        let ram = latest.ram.as_ref().unwrap();
        assert_eq!(ram.usage_percent, Some(50.0), "normalizer derives the percent");
        assert!(latest.collector_errors.is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn slow_collector_times_out_without_aborting_the_tick() {
        let (pipeline, ring, _, registry) = pipeline_with(vec![
            Arc::new(StubCollector {
                name: "ram",
                behavior: Behavior::Ram(4.0),
            }),
            Arc::new(StubCollector {
                name: "network",
                behavior: Behavior::SleepForever,
            }),
        ]);
        pipeline.run_tick(Cadence::High, 1).await;

        let latest = ring.latest().unwrap();
        assert!(latest.ram.is_some());
        assert!(latest.network.is_none());
        assert_eq!(
            latest.collector_errors.get("network").map(String::as_str),
            Some("timeout")
        );
        // timeouts do not auto-disable
        assert!(!registry.is_disabled("network"));
    }

    #[tokio::test]
    async fn permanent_failure_disables_the_collector() {
        let (pipeline, ring, _, registry) = pipeline_with(vec![
            Arc::new(StubCollector {
                name: "ram",
                behavior: Behavior::Ram(4.0),
            }),
            Arc::new(StubCollector {
                name: "gpu",
                behavior: Behavior::Fail(FailureKind::Unsupported),
            }),
        ]);
        pipeline.run_tick(Cadence::High, 1).await;
        assert!(registry.is_disabled("gpu"));
        let latest = ring.latest().unwrap();
        assert_eq!(
            latest.collector_errors.get("gpu").map(String::as_str),
            Some("unsupported")
        );
        // the next tick no longer runs the collector at all
        pipeline.run_tick(Cadence::High, 1).await;
        let latest = ring.latest().unwrap();
        assert!(!latest.collector_errors.contains_key("gpu"));
    }

    #[tokio::test]
    async fn invalid_fragment_is_rejected_with_reason() {
        let (pipeline, ring, _, _) = pipeline_with(vec![
            Arc::new(StubCollector {
                name: "ram",
                behavior: Behavior::InvalidRam,
            }),
            Arc::new(StubCollector {
                name: "context",
                behavior: Behavior::Context,
            }),
        ]);
        pipeline.run_tick(Cadence::High, 1).await;
        let latest = ring.latest().unwrap();
        assert_eq!(
            latest.collector_errors.get("ram").map(String::as_str),
            Some("invalid_range:total_gb")
        );
    }

    #[tokio::test]
    async fn snapshot_with_no_fragments_is_discarded() {
        let (pipeline, ring, queue, _) = pipeline_with(vec![Arc::new(StubCollector {
            name: "ram",
            behavior: Behavior::Fail(FailureKind::TransientError),
        })]);
        pipeline.run_tick(Cadence::High, 1).await;
        assert!(ring.latest().is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn timestamps_are_strictly_monotonic() {
        let (pipeline, ring, _, _) = pipeline_with(vec![Arc::new(StubCollector {
            name: "ram",
            behavior: Behavior::Ram(4.0),
        })]);
        for _ in 0..5 {
            pipeline.run_tick(Cadence::High, 1).await;
        }
        let window = ring.window(10);
        assert_eq!(window.len(), 5);
        for pair in window.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn write_queue_drops_oldest_when_full() {
        let queue = WriteQueue::new(2);
        let snapshot = |ms: i64| {
            Arc::new(Snapshot {
                timestamp: Utc.timestamp_millis_opt(ms).unwrap(),
                cpu: None,
                ram: None,
                gpu: None,
                disk: None,
                network: None,
                processes: None,
                context: None,
                collection_duration_ms: 0,
                collector_errors: BTreeMap::new(),
            })
        };
        assert!(!queue.push(snapshot(1)));
        assert!(!queue.push(snapshot(2)));
        assert!(queue.push(snapshot(3)), "third push drops the oldest");
        let first = queue.pop().await.unwrap();
        assert_eq!(first.timestamp.timestamp_millis(), 2);
    }

    #[tokio::test]
    async fn closed_queue_drains_then_ends() {
        let queue = Arc::new(WriteQueue::new(4));
        queue.push(Arc::new(Snapshot {
            timestamp: Utc::now(),
            cpu: None,
            ram: None,
            gpu: None,
            disk: None,
            network: None,
            processes: None,
            context: None,
            collection_duration_ms: 0,
            collector_errors: BTreeMap::new(),
        }));
        queue.close();
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }
}
