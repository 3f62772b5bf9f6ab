//! Pattern layer
//!
//! Consumes the live snapshot feed and runs three detectors per primary
//! metric: rolling baseline, threshold-with-hysteresis, and spike. Detected
//! events are written to the anomalies table synchronously, so anomalies for
//! a metric never land out of order relative to the snapshots that produced
//! them.

mod baseline;
mod spike;
mod threshold;

pub use baseline::{Baseline, BaselineTracker};
pub use spike::SpikeDetector;
pub use threshold::ThresholdDetector;

use crate::config::PatternsConfig;
use crate::models::{Anomaly, MetricKind, Severity, Snapshot};
use crate::ring::Subscription;
use crate::store::{BaselineRow, Store};
use chrono::Utc;
use log::{debug, info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

struct MetricState {
    baseline: BaselineTracker,
    threshold: Option<ThresholdDetector>,
    spike: SpikeDetector,
}

pub struct PatternEngine {
    store: Arc<Store>,
    config: PatternsConfig,
    state: Mutex<HashMap<MetricKind, MetricState>>,
}

impl PatternEngine {
    pub fn new(store: Arc<Store>, config: PatternsConfig) -> Self {
        Self {
            store,
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Seed baseline trackers from rows persisted by a previous run, so
    /// spike detection does not restart from a cold window.
    pub async fn warm_start(&self) {
        let rows = match self.store.load_baselines().await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("[patterns] could not load persisted baselines: {e}");
                return;
            }
        };
        let mut state = self.state.lock().await;
        for row in rows {
            let Some(metric) = MetricKind::parse(&row.metric_name) else {
                continue;
            };
            let entry = state
                .entry(metric)
                .or_insert_with(|| self.new_metric_state(metric));
            entry.baseline.seed(Baseline {
                mean: row.mean,
                std: row.std,
                sample_count: row.sample_count,
            });
            debug!("[patterns] warm-started {} from stored baseline", row.metric_name);
        }
    }

    fn new_metric_state(&self, metric: MetricKind) -> MetricState {
        let threshold = self
            .config
            .thresholds
            .get(metric.as_str())
            .map(|pair| ThresholdDetector::new(*pair, self.config.sustain_window));
        MetricState {
            baseline: BaselineTracker::new(
                self.config.window_samples,
                self.config.baseline_min_samples,
            ),
            threshold,
            spike: SpikeDetector::new(self.config.spike_k),
        }
    }

    /// Run all detectors against one snapshot. Absent fragments are skipped.
    pub async fn process_snapshot(&self, snapshot: &Snapshot) {
        let mut anomalies = Vec::new();
        {
            let mut state = self.state.lock().await;
            for metric in MetricKind::ALL {
                let Some(value) = snapshot.metric_value(metric) else {
                    continue;
                };
                let entry = state
                    .entry(metric)
                    .or_insert_with(|| self.new_metric_state(metric));

                let baseline = entry.baseline.current();

                if let Some(detector) = entry.threshold.as_mut() {
                    if let Some(event) = detector.observe(value) {
                        let expected = match event.severity {
                            Severity::Critical => detector.critical_level(),
                            _ => detector.warn_level(),
                        };
                        anomalies.push(Anomaly {
                            id: None,
                            timestamp: snapshot.timestamp,
                            metric_name: metric.as_str().to_string(),
                            current_value: value,
                            expected_value: expected,
                            deviation_std: baseline
                                .filter(|b| b.std > f64::EPSILON)
                                .map(|b| (value - b.mean).abs() / b.std)
                                .unwrap_or(0.0),
                            severity: event.severity,
                            context: json!({
                                "kind": "threshold",
                                "warn": detector.warn_level(),
                                "critical": detector.critical_level(),
                                "sustain_window": self.config.sustain_window,
                            }),
                        });
                    }
                }

                if let Some(event) = entry.spike.observe(value, baseline) {
                    let severity = match (&entry.threshold, baseline) {
                        (Some(detector), Some(b)) if b.mean >= detector.warn_level() => {
                            Severity::Warn
                        }
                        _ => Severity::Info,
                    };
                    anomalies.push(Anomaly {
                        id: None,
                        timestamp: snapshot.timestamp,
                        metric_name: metric.as_str().to_string(),
                        current_value: value,
                        expected_value: event.expected,
                        deviation_std: event.deviation_std,
                        severity,
                        context: json!({
                            "kind": "spike",
                            "k": self.config.spike_k,
                        }),
                    });
                }

                entry.baseline.push(value);
            }
        }

        for anomaly in anomalies {
            if let Err(e) = self.store.write_anomaly(&anomaly).await {
                warn!(
                    "[patterns] failed to persist {} anomaly for {}: {e}",
                    anomaly.severity.as_str(),
                    anomaly.metric_name
                );
            } else {
                info!(
                    "[patterns] anomaly metric={} severity={} value={:.2}",
                    anomaly.metric_name,
                    anomaly.severity.as_str(),
                    anomaly.current_value
                );
            }
        }
    }

    /// Persist the latest baseline per metric, one row each.
    pub async fn persist_baselines(&self) {
        let rows: Vec<BaselineRow> = {
            let state = self.state.lock().await;
            state
                .iter()
                .filter(|(_, s)| s.baseline.len() >= self.config.baseline_min_samples)
                .filter_map(|(metric, s)| {
                    s.baseline.current().map(|b| BaselineRow {
                        metric_name: metric.as_str().to_string(),
                        mean: b.mean,
                        std: b.std,
                        sample_count: b.sample_count,
                        updated_at: Utc::now(),
                    })
                })
                .collect()
        };
        for row in rows {
            if let Err(e) = self.store.upsert_baseline(&row).await {
                warn!("[patterns] failed to persist baseline for {}: {e}", row.metric_name);
            }
        }
    }

    /// Drive the engine from a ring-buffer subscription until the feed closes.
    pub async fn run(self: Arc<Self>, mut subscription: Subscription) {
        info!("[patterns] engine started");
        while let Some(snapshot) = subscription.recv().await {
            self.process_snapshot(&snapshot).await;
        }
        info!("[patterns] snapshot feed closed, engine stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PatternsConfig, StoreConfig, ThresholdPair};
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn cpu_snapshot(ms: i64, usage: f64) -> Snapshot {
        Snapshot {
            timestamp: chrono::Utc.timestamp_millis_opt(ms).unwrap(),
            cpu: Some(crate::models::CpuMetrics {
                usage_percent: usage,
                frequency_mhz: None,
                per_core_usage: vec![],
                temperature_celsius: None,
                logical_count: 1,
                physical_count: 1,
                load_average: None,
            }),
            ram: None,
            gpu: None,
            disk: None,
            network: None,
            processes: None,
            context: None,
            collection_duration_ms: 0,
            collector_errors: BTreeMap::new(),
        }
    }

    async fn engine(dir: &TempDir, config: PatternsConfig) -> (Arc<Store>, PatternEngine) {
        let store = Arc::new(
            Store::open(&StoreConfig {
                path: dir.path().join("patterns.db"),
                ..StoreConfig::default()
            })
            .await
            .unwrap(),
        );
        let engine = PatternEngine::new(Arc::clone(&store), config);
        (store, engine)
    }

    fn warn_only_config() -> PatternsConfig {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            "cpu_percent".to_string(),
            ThresholdPair {
                warn: 90.0,
                critical: 200.0,
            },
        );
        PatternsConfig {
            sustain_window: 10,
            thresholds,
            ..PatternsConfig::default()
        }
    }

    #[tokio::test]
    async fn sustained_crossing_emits_one_warn_at_the_tenth_sample() {
        let dir = TempDir::new().unwrap();
        let (store, engine) = engine(&dir, warn_only_config()).await;

        let base_ms = 1_700_000_000_000i64;
        let series: Vec<f64> = std::iter::repeat(50.0)
            .take(20)
            .chain(std::iter::repeat(95.0).take(12))
            .chain(std::iter::repeat(50.0).take(20))
            .collect();
        for (i, v) in series.iter().enumerate() {
            engine
                .process_snapshot(&cpu_snapshot(base_ms + i as i64 * 3000, *v))
                .await;
        }

        let from = chrono::Utc.timestamp_millis_opt(base_ms - 1000).unwrap();
        let anomalies = store
            .anomalies(from, from + Duration::hours(1))
            .await
            .unwrap();
        let threshold_events: Vec<&Anomaly> = anomalies
            .iter()
            .filter(|a| a.context["kind"] == "threshold")
            .collect();
        assert_eq!(threshold_events.len(), 1);
        let event = threshold_events[0];
        assert_eq!(event.metric_name, "cpu_percent");
        assert_eq!(event.severity, Severity::Warn);
        // the 10th sample at 95 is the 30th overall, index 29
        assert_eq!(event.timestamp.timestamp_millis(), base_ms + 29 * 3000);
    }

    #[tokio::test]
    async fn spike_is_info_when_baseline_is_normal() {
        let dir = TempDir::new().unwrap();
        let config = PatternsConfig {
            baseline_min_samples: 30,
            spike_k: 3.0,
            ..warn_only_config()
        };
        let (store, engine) = engine(&dir, config).await;

        let base_ms = 1_700_000_000_000i64;
        // alternate slightly so the std is non-zero, mean stays near 50
        for i in 0..40i64 {
            let v = if i % 2 == 0 { 49.0 } else { 51.0 };
            engine.process_snapshot(&cpu_snapshot(base_ms + i * 3000, v)).await;
        }
        engine
            .process_snapshot(&cpu_snapshot(base_ms + 40 * 3000, 70.0))
            .await;

        let from = chrono::Utc.timestamp_millis_opt(base_ms - 1000).unwrap();
        let anomalies = store
            .anomalies(from, from + Duration::hours(1))
            .await
            .unwrap();
        let spikes: Vec<&Anomaly> = anomalies
            .iter()
            .filter(|a| a.context["kind"] == "spike")
            .collect();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].severity, Severity::Info);
        assert!((spikes[0].expected_value - 50.0).abs() < 0.2);
    }

    #[tokio::test]
    async fn no_spike_during_cold_start() {
        let dir = TempDir::new().unwrap();
        let (store, engine) = engine(&dir, warn_only_config()).await;

        let base_ms = 1_700_000_000_000i64;
        for i in 0..10i64 {
            engine
                .process_snapshot(&cpu_snapshot(base_ms + i * 3000, 50.0))
                .await;
        }
        engine
            .process_snapshot(&cpu_snapshot(base_ms + 10 * 3000, 100.0))
            .await;

        let from = chrono::Utc.timestamp_millis_opt(base_ms - 1000).unwrap();
        let anomalies = store
            .anomalies(from, from + Duration::hours(1))
            .await
            .unwrap();
        assert!(
            anomalies.iter().all(|a| a.context["kind"] != "spike"),
            "cold-start spike leaked through"
        );
    }

    #[tokio::test]
    async fn baselines_persist_and_warm_start() {
        let dir = TempDir::new().unwrap();
        let (store, engine) = engine(&dir, warn_only_config()).await;
        let base_ms = 1_700_000_000_000i64;
        for i in 0..40i64 {
            let v = if i % 2 == 0 { 49.0 } else { 51.0 };
            engine.process_snapshot(&cpu_snapshot(base_ms + i * 3000, v)).await;
        }
        engine.persist_baselines().await;

        let rows = store.load_baselines().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].metric_name, "cpu_percent");
        assert!((rows[0].mean - 50.0).abs() < 0.2);

        // a fresh engine picks the baseline up and can spike immediately
        let fresh = PatternEngine::new(Arc::clone(&store), warn_only_config());
        fresh.warm_start().await;
        fresh
            .process_snapshot(&cpu_snapshot(base_ms + 200_000, 80.0))
            .await;
        let from = chrono::Utc.timestamp_millis_opt(base_ms + 150_000).unwrap();
        let anomalies = store
            .anomalies(from, from + Duration::hours(1))
            .await
            .unwrap();
        assert!(anomalies.iter().any(|a| a.context["kind"] == "spike"));
    }
}
