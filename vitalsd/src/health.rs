//! Component health registry
//!
//! Shared by the scheduler, pipeline and store writer; read by /health.
//! The health endpoint always answers 200, so this type never fails — it
//! only records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectorHealth {
    pub last_success_ts: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub scheduler: &'static str,
    pub store: &'static str,
    pub ring_buffer: &'static str,
    pub collectors: BTreeMap<String, CollectorHealth>,
    pub ticks_completed: u64,
    pub store_drops: u64,
    pub self_throttled: bool,
}

pub struct Health {
    scheduler_ok: AtomicBool,
    store_degraded: AtomicBool,
    consecutive_write_failures: AtomicU32,
    write_failure_threshold: u32,
    ticks_completed: AtomicU64,
    store_drops: AtomicU64,
    self_throttled: AtomicBool,
    ring_populated: AtomicBool,
    collectors: RwLock<BTreeMap<String, CollectorHealth>>,
}

impl Health {
    pub fn new(write_failure_threshold: u32) -> Self {
        Self {
            scheduler_ok: AtomicBool::new(false),
            store_degraded: AtomicBool::new(false),
            consecutive_write_failures: AtomicU32::new(0),
            write_failure_threshold: write_failure_threshold.max(1),
            ticks_completed: AtomicU64::new(0),
            store_drops: AtomicU64::new(0),
            self_throttled: AtomicBool::new(false),
            ring_populated: AtomicBool::new(false),
            collectors: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn set_scheduler_ok(&self, ok: bool) {
        self.scheduler_ok.store(ok, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
        self.ring_populated.store(true, Ordering::Relaxed);
    }

    pub fn record_collector_success(&self, name: &str) {
        let mut collectors = self.collectors.write().unwrap();
        let entry = collectors.entry(name.to_string()).or_default();
        entry.last_success_ts = Some(Utc::now());
        entry.last_error = None;
    }

    pub fn record_collector_error(&self, name: &str, reason: &str) {
        let mut collectors = self.collectors.write().unwrap();
        let entry = collectors.entry(name.to_string()).or_default();
        entry.last_error = Some(reason.to_string());
    }

    pub fn mark_collector_disabled(&self, name: &str) {
        let mut collectors = self.collectors.write().unwrap();
        collectors.entry(name.to_string()).or_default().disabled = true;
    }

    pub fn record_store_ok(&self) {
        self.consecutive_write_failures.store(0, Ordering::Relaxed);
        self.store_degraded.store(false, Ordering::Relaxed);
    }

    /// Returns true when the failure pushed the store into degraded mode.
    pub fn record_store_failure(&self) -> bool {
        let failures = self.consecutive_write_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.write_failure_threshold {
            let was = self.store_degraded.swap(true, Ordering::Relaxed);
            return !was;
        }
        false
    }

    pub fn store_degraded(&self) -> bool {
        self.store_degraded.load(Ordering::Relaxed)
    }

    pub fn record_store_drop(&self) {
        self.store_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_self_throttled(&self) {
        self.self_throttled.store(true, Ordering::Relaxed);
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            scheduler: if self.scheduler_ok.load(Ordering::Relaxed) {
                "ok"
            } else {
                "stopped"
            },
            store: if self.store_degraded.load(Ordering::Relaxed) {
                "degraded"
            } else {
                "ok"
            },
            ring_buffer: if self.ring_populated.load(Ordering::Relaxed) {
                "ok"
            } else {
                "empty"
            },
            collectors: self.collectors.read().unwrap().clone(),
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            store_drops: self.store_drops.load(Ordering::Relaxed),
            self_throttled: self.self_throttled.load(Ordering::Relaxed),
        }
    }
}
