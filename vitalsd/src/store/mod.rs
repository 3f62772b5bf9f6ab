//! Embedded time-series store
//!
//! Single SQLite file in WAL mode: one header row per snapshot plus
//! per-family child tables keyed by snapshot id with ON DELETE CASCADE.
//! One writer (the pipeline's writer task), many readers. All writes for a
//! snapshot commit in one transaction or not at all.

mod schema;

use crate::config::StoreConfig;
use crate::models::{
    Anomaly, CpuMetrics, DiskMetrics, GpuMetrics, MetricKind, NetworkMetrics, ProcessInfo,
    RamMetrics, Severity, Snapshot, SystemContext, TimeOfDay, UserAction,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate_timestamp")]
    DuplicateTimestamp,
    #[error("storage_full")]
    StorageFull,
    #[error("schema_too_new: file is version {found}, this build supports {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SummaryStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub samples: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub db_size_mb: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub snapshots_deleted: u64,
    pub anomalies_deleted: u64,
    pub vacuumed: bool,
}

#[derive(Debug, Clone)]
pub struct BaselineRow {
    pub metric_name: String,
    pub mean: f64,
    pub std: f64,
    pub sample_count: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
    retention_days: i64,
    anomaly_retention_days: i64,
    size_cap_mb: u64,
}

impl Store {
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            path: config.path.clone(),
            retention_days: config.retention_days,
            anomaly_retention_days: config.anomaly_retention_days,
            size_cap_mb: config.size_cap_mb,
        };
        store.migrate().await?;
        info!("store opened at {}", store.path.display());
        Ok(store)
    }

    /// Idempotent: applies pending schema versions in order, refuses files
    /// written by a newer build.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        let current = self.schema_version().await?;
        if current > schema::LATEST_VERSION {
            return Err(StoreError::SchemaTooNew {
                found: current,
                supported: schema::LATEST_VERSION,
            });
        }

        for (version, sql) in schema::MIGRATIONS {
            if *version <= current {
                continue;
            }
            info!("applying schema migration to version {version}");
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(sql).execute(&mut *tx).await?;
            sqlx::query(
                "INSERT INTO schema_metadata (key, value, updated_at)
                 VALUES ('version', ?, strftime('%s','now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
            )
            .bind(version.to_string())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
        }
        Ok(())
    }

    async fn schema_version(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT value FROM schema_metadata WHERE key = 'version'")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .and_then(|r| r.get::<String, _>(0).parse().ok())
            .unwrap_or(0))
    }

    /// Write one snapshot atomically. Every present fragment produces its
    /// child rows in the same transaction as the header.
    pub async fn write(&self, snapshot: &Snapshot) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let errors_json = serde_json::to_string(&snapshot.collector_errors).unwrap_or_default();
        let result = sqlx::query(
            "INSERT INTO system_snapshots (timestamp, collection_duration_ms, collector_errors)
             VALUES (?, ?, ?)",
        )
        .bind(snapshot.timestamp.timestamp_millis())
        .bind(snapshot.collection_duration_ms)
        .bind(errors_json)
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;
        let snapshot_id = result.last_insert_rowid();

        if let Some(cpu) = &snapshot.cpu {
            let cpu_row = sqlx::query(
                "INSERT INTO cpu_metrics (snapshot_id, usage_percent, frequency_mhz,
                     temperature_celsius, logical_count, physical_count, load_1, load_5, load_15)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(cpu.usage_percent)
            .bind(cpu.frequency_mhz)
            .bind(cpu.temperature_celsius)
            .bind(cpu.logical_count)
            .bind(cpu.physical_count)
            .bind(cpu.load_average.map(|l| l[0]))
            .bind(cpu.load_average.map(|l| l[1]))
            .bind(cpu.load_average.map(|l| l[2]))
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;
            let cpu_metric_id = cpu_row.last_insert_rowid();
            for (core_index, usage) in cpu.per_core_usage.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO cpu_core_usage (cpu_metric_id, core_index, usage_percent)
                     VALUES (?, ?, ?)",
                )
                .bind(cpu_metric_id)
                .bind(core_index as i64)
                .bind(*usage)
                .execute(&mut *tx)
                .await
                .map_err(map_write_error)?;
            }
        }

        if let Some(ram) = &snapshot.ram {
            sqlx::query(
                "INSERT INTO ram_metrics (snapshot_id, total_gb, used_gb, available_gb,
                     cached_gb, swap_total_gb, swap_used_gb, usage_percent)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(ram.total_gb)
            .bind(ram.used_gb)
            .bind(ram.available_gb)
            .bind(ram.cached_gb)
            .bind(ram.swap_total_gb)
            .bind(ram.swap_used_gb)
            .bind(ram.usage_percent)
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;
        }

        if let Some(gpus) = &snapshot.gpu {
            for (gpu_index, gpu) in gpus.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO gpu_metrics (snapshot_id, gpu_index, name, usage_percent,
                         memory_used_gb, memory_total_gb, temperature_celsius, fan_rpm,
                         power_watts, core_clock_mhz, memory_clock_mhz)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(snapshot_id)
                .bind(gpu_index as i64)
                .bind(&gpu.name)
                .bind(gpu.usage_percent)
                .bind(gpu.memory_used_gb)
                .bind(gpu.memory_total_gb)
                .bind(gpu.temperature_celsius)
                .bind(gpu.fan_rpm)
                .bind(gpu.power_watts)
                .bind(gpu.core_clock_mhz)
                .bind(gpu.memory_clock_mhz)
                .execute(&mut *tx)
                .await
                .map_err(map_write_error)?;
            }
        }

        if let Some(disk) = &snapshot.disk {
            sqlx::query(
                "INSERT INTO disk_metrics (snapshot_id, read_mbps, write_mbps, queue_length,
                     io_ops_per_sec, warming_up, devices_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(disk.read_mbps)
            .bind(disk.write_mbps)
            .bind(disk.queue_length)
            .bind(disk.io_ops_per_sec)
            .bind(disk.warming_up)
            .bind(serde_json::to_string(&disk.disks).unwrap_or_else(|_| "[]".to_string()))
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;
        }

        if let Some(network) = &snapshot.network {
            sqlx::query(
                "INSERT INTO network_metrics (snapshot_id, download_mbps, upload_mbps,
                     connections_active, bytes_sent, bytes_received, packets_sent,
                     packets_received, errors, warming_up, interfaces_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(network.download_mbps)
            .bind(network.upload_mbps)
            .bind(network.connections_active)
            .bind(network.bytes_sent as i64)
            .bind(network.bytes_received as i64)
            .bind(network.packets_sent as i64)
            .bind(network.packets_received as i64)
            .bind(network.errors as i64)
            .bind(network.warming_up)
            .bind(serde_json::to_string(&network.interfaces).unwrap_or_else(|_| "[]".to_string()))
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;
        }

        if let Some(processes) = &snapshot.processes {
            for process in processes {
                sqlx::query(
                    "INSERT INTO process_info (snapshot_id, name, pid, cpu_percent, memory_mb,
                         thread_count, status, started_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(snapshot_id)
                .bind(&process.name)
                .bind(process.pid)
                .bind(process.cpu_percent)
                .bind(process.memory_mb)
                .bind(process.thread_count)
                .bind(&process.status)
                .bind(process.started_at.map(|t| t.timestamp_millis()))
                .execute(&mut *tx)
                .await
                .map_err(map_write_error)?;
            }
        }

        if let Some(context) = &snapshot.context {
            sqlx::query(
                "INSERT INTO system_context (snapshot_id, user_active, idle_seconds,
                     screen_locked, time_of_day, day_of_week, user_action)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(snapshot_id)
            .bind(context.user_active)
            .bind(context.idle_seconds as i64)
            .bind(context.screen_locked)
            .bind(time_of_day_str(context.time_of_day))
            .bind(&context.day_of_week)
            .bind(user_action_str(context.user_action))
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;
        }

        tx.commit().await.map_err(map_write_error)?;
        debug!(
            "wrote snapshot #{snapshot_id} at {}",
            snapshot.timestamp.to_rfc3339()
        );
        Ok(snapshot_id)
    }

    /// The `n` most recent snapshots, newest first, fully reassembled.
    pub async fn recent(&self, n: u32) -> Result<Vec<Snapshot>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, timestamp, collection_duration_ms, collector_errors
             FROM system_snapshots ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            snapshots.push(self.load_snapshot(&row).await?);
        }
        Ok(snapshots)
    }

    async fn load_snapshot(&self, header: &sqlx::sqlite::SqliteRow) -> Result<Snapshot, StoreError> {
        let id: i64 = header.get(0);
        let timestamp = ms_to_datetime(header.get(1));
        let collection_duration_ms: u32 = header.get::<i64, _>(2).max(0) as u32;
        let collector_errors: BTreeMap<String, String> = header
            .get::<Option<String>, _>(3)
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        Ok(Snapshot {
            timestamp,
            cpu: self.load_cpu(id).await?,
            ram: self.load_ram(id).await?,
            gpu: self.load_gpus(id).await?,
            disk: self.load_disk(id).await?,
            network: self.load_network(id).await?,
            processes: self.load_processes(id).await?,
            context: self.load_context(id).await?,
            collection_duration_ms,
            collector_errors,
        })
    }

    async fn load_cpu(&self, snapshot_id: i64) -> Result<Option<CpuMetrics>, StoreError> {
        let row = sqlx::query(
            "SELECT id, usage_percent, frequency_mhz, temperature_celsius, logical_count,
                    physical_count, load_1, load_5, load_15
             FROM cpu_metrics WHERE snapshot_id = ?",
        )
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };

        let cpu_metric_id: i64 = row.get(0);
        let core_rows = sqlx::query(
            "SELECT usage_percent FROM cpu_core_usage
             WHERE cpu_metric_id = ? ORDER BY core_index",
        )
        .bind(cpu_metric_id)
        .fetch_all(&self.pool)
        .await?;

        let load_1: Option<f64> = row.get(6);
        let load_average = match (load_1, row.get::<Option<f64>, _>(7), row.get::<Option<f64>, _>(8))
        {
            (Some(a), Some(b), Some(c)) => Some([a, b, c]),
            _ => None,
        };

        Ok(Some(CpuMetrics {
            usage_percent: row.get(1),
            frequency_mhz: row.get(2),
            per_core_usage: core_rows.iter().map(|r| r.get(0)).collect(),
            temperature_celsius: row.get(3),
            logical_count: row.get::<i64, _>(4) as u32,
            physical_count: row.get::<i64, _>(5) as u32,
            load_average,
        }))
    }

    async fn load_ram(&self, snapshot_id: i64) -> Result<Option<RamMetrics>, StoreError> {
        let row = sqlx::query(
            "SELECT total_gb, used_gb, available_gb, cached_gb, swap_total_gb, swap_used_gb,
                    usage_percent
             FROM ram_metrics WHERE snapshot_id = ?",
        )
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| RamMetrics {
            total_gb: r.get(0),
            used_gb: r.get(1),
            available_gb: r.get(2),
            cached_gb: r.get(3),
            swap_total_gb: r.get(4),
            swap_used_gb: r.get(5),
            usage_percent: r.get(6),
        }))
    }

    async fn load_gpus(&self, snapshot_id: i64) -> Result<Option<Vec<GpuMetrics>>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, usage_percent, memory_used_gb, memory_total_gb, temperature_celsius,
                    fan_rpm, power_watts, core_clock_mhz, memory_clock_mhz
             FROM gpu_metrics WHERE snapshot_id = ? ORDER BY gpu_index",
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            rows.iter()
                .map(|r| GpuMetrics {
                    name: r.get(0),
                    usage_percent: r.get(1),
                    memory_used_gb: r.get(2),
                    memory_total_gb: r.get(3),
                    temperature_celsius: r.get(4),
                    fan_rpm: r.get(5),
                    power_watts: r.get(6),
                    core_clock_mhz: r.get(7),
                    memory_clock_mhz: r.get(8),
                })
                .collect(),
        ))
    }

    async fn load_disk(&self, snapshot_id: i64) -> Result<Option<DiskMetrics>, StoreError> {
        let row = sqlx::query(
            "SELECT read_mbps, write_mbps, queue_length, io_ops_per_sec, warming_up, devices_json
             FROM disk_metrics WHERE snapshot_id = ?",
        )
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| DiskMetrics {
            read_mbps: r.get(0),
            write_mbps: r.get(1),
            queue_length: r.get(2),
            io_ops_per_sec: r.get(3),
            warming_up: r.get(4),
            disks: serde_json::from_str(&r.get::<String, _>(5)).unwrap_or_default(),
        }))
    }

    async fn load_network(&self, snapshot_id: i64) -> Result<Option<NetworkMetrics>, StoreError> {
        let row = sqlx::query(
            "SELECT download_mbps, upload_mbps, connections_active, bytes_sent, bytes_received,
                    packets_sent, packets_received, errors, warming_up, interfaces_json
             FROM network_metrics WHERE snapshot_id = ?",
        )
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| NetworkMetrics {
            download_mbps: r.get(0),
            upload_mbps: r.get(1),
            connections_active: r.get::<i64, _>(2).max(0) as u32,
            bytes_sent: r.get::<i64, _>(3).max(0) as u64,
            bytes_received: r.get::<i64, _>(4).max(0) as u64,
            packets_sent: r.get::<i64, _>(5).max(0) as u64,
            packets_received: r.get::<i64, _>(6).max(0) as u64,
            errors: r.get::<i64, _>(7).max(0) as u64,
            warming_up: r.get(8),
            interfaces: serde_json::from_str(&r.get::<String, _>(9)).unwrap_or_default(),
        }))
    }

    async fn load_processes(&self, snapshot_id: i64) -> Result<Option<Vec<ProcessInfo>>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, pid, cpu_percent, memory_mb, thread_count, status, started_at
             FROM process_info WHERE snapshot_id = ?
             ORDER BY cpu_percent DESC, memory_mb DESC, name ASC",
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows.iter().map(process_from_row).collect()))
    }

    async fn load_context(&self, snapshot_id: i64) -> Result<Option<SystemContext>, StoreError> {
        let row = sqlx::query(
            "SELECT user_active, idle_seconds, screen_locked, time_of_day, day_of_week, user_action
             FROM system_context WHERE snapshot_id = ?",
        )
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| SystemContext {
            user_active: r.get(0),
            idle_seconds: r.get::<i64, _>(1).max(0) as u64,
            screen_locked: r.get(2),
            time_of_day: parse_time_of_day(&r.get::<String, _>(3)),
            day_of_week: r.get(4),
            user_action: parse_user_action(&r.get::<String, _>(5)),
        }))
    }

    /// Per-metric series over [from, to), decimated to at most `max_points`
    /// bucketed averages with bucket edges aligned to `from`.
    pub async fn history(
        &self,
        metric: MetricKind,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        max_points: usize,
    ) -> Result<Vec<HistoryPoint>, StoreError> {
        let series = series_sql(metric);
        let from_ms = from.timestamp_millis();
        let to_ms = to.timestamp_millis();
        let max_points = max_points.max(1);

        let count: i64 = sqlx::query(&format!("SELECT COUNT(*) FROM ({series})"))
            .bind(from_ms)
            .bind(to_ms)
            .fetch_one(&self.pool)
            .await?
            .get(0);

        if count as usize <= max_points {
            let rows = sqlx::query(&format!("SELECT ts, value FROM ({series}) ORDER BY ts"))
                .bind(from_ms)
                .bind(to_ms)
                .fetch_all(&self.pool)
                .await?;
            return Ok(rows
                .iter()
                .map(|r| HistoryPoint {
                    timestamp: ms_to_datetime(r.get(0)),
                    value: r.get(1),
                })
                .collect());
        }

        let span = (to_ms - from_ms).max(1);
        let width = (span + max_points as i64 - 1) / max_points as i64;
        let rows = sqlx::query(&format!(
            "SELECT ((ts - ?) / ?) AS bucket, AVG(value) AS value
             FROM ({series}) GROUP BY bucket ORDER BY bucket"
        ))
        .bind(from_ms)
        .bind(width)
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| HistoryPoint {
                timestamp: ms_to_datetime(from_ms + r.get::<i64, _>(0) * width),
                value: r.get(1),
            })
            .collect())
    }

    /// Processes from the most recent snapshot that carried a process list.
    pub async fn processes(&self, limit: u32) -> Result<Vec<ProcessInfo>, StoreError> {
        let rows = sqlx::query(
            "SELECT p.name, p.pid, p.cpu_percent, p.memory_mb, p.thread_count, p.status,
                    p.started_at
             FROM process_info p
             WHERE p.snapshot_id = (
                 SELECT s.id FROM system_snapshots s
                 JOIN process_info q ON q.snapshot_id = s.id
                 ORDER BY s.timestamp DESC LIMIT 1
             )
             ORDER BY p.cpu_percent DESC, p.memory_mb DESC, p.name ASC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(process_from_row).collect())
    }

    /// avg/min/max/p95 per primary metric over the trailing window.
    pub async fn summary(
        &self,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, SummaryStats>, StoreError> {
        let from_ms = (now - window).timestamp_millis();
        let to_ms = now.timestamp_millis() + 1;

        let mut out = BTreeMap::new();
        for metric in MetricKind::ALL {
            let series = series_sql(metric);
            let row = sqlx::query(&format!(
                "SELECT AVG(value), MIN(value), MAX(value), COUNT(*) FROM ({series})"
            ))
            .bind(from_ms)
            .bind(to_ms)
            .fetch_one(&self.pool)
            .await?;
            let count: i64 = row.get(3);
            if count == 0 {
                continue;
            }
            let offset = ((count - 1) as f64 * 0.95).floor() as i64;
            let p95: f64 = sqlx::query(&format!(
                "SELECT value FROM ({series}) ORDER BY value LIMIT 1 OFFSET ?"
            ))
            .bind(from_ms)
            .bind(to_ms)
            .bind(offset)
            .fetch_one(&self.pool)
            .await?
            .get(0);

            out.insert(
                metric.as_str().to_string(),
                SummaryStats {
                    avg: row.get(0),
                    min: row.get(1),
                    max: row.get(2),
                    p95,
                },
            );
        }
        Ok(out)
    }

    pub async fn write_anomaly(&self, anomaly: &Anomaly) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO anomalies (timestamp, metric_name, current_value, expected_value,
                 deviation_std, severity, context_json)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(anomaly.timestamp.timestamp_millis())
        .bind(&anomaly.metric_name)
        .bind(anomaly.current_value)
        .bind(anomaly.expected_value)
        .bind(anomaly.deviation_std)
        .bind(anomaly.severity.as_str())
        .bind(anomaly.context.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn anomalies(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Anomaly>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, timestamp, metric_name, current_value, expected_value, deviation_std,
                    severity, context_json
             FROM anomalies WHERE timestamp >= ? AND timestamp < ?
             ORDER BY timestamp ASC",
        )
        .bind(from.timestamp_millis())
        .bind(to.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| Anomaly {
                id: Some(r.get(0)),
                timestamp: ms_to_datetime(r.get(1)),
                metric_name: r.get(2),
                current_value: r.get(3),
                expected_value: r.get(4),
                deviation_std: r.get(5),
                severity: Severity::parse(&r.get::<String, _>(6)).unwrap_or(Severity::Info),
                context: serde_json::from_str(&r.get::<String, _>(7))
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }

    pub async fn upsert_baseline(&self, baseline: &BaselineRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO baselines (metric_name, mean, std, sample_count, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(metric_name) DO UPDATE SET mean = excluded.mean,
                 std = excluded.std, sample_count = excluded.sample_count,
                 updated_at = excluded.updated_at",
        )
        .bind(&baseline.metric_name)
        .bind(baseline.mean)
        .bind(baseline.std)
        .bind(baseline.sample_count as i64)
        .bind(baseline.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_baselines(&self) -> Result<Vec<BaselineRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT metric_name, mean, std, sample_count, updated_at FROM baselines",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| BaselineRow {
                metric_name: r.get(0),
                mean: r.get(1),
                std: r.get(2),
                sample_count: r.get::<i64, _>(3).max(0) as u64,
                updated_at: ms_to_datetime(r.get(4)),
            })
            .collect())
    }

    /// Delete snapshots past the retention horizon (children cascade), trim
    /// anomalies past their longer horizon, then compact if the file still
    /// exceeds the size cap.
    pub async fn retention_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        let cutoff = (now - Duration::days(self.retention_days)).timestamp_millis();
        report.snapshots_deleted = sqlx::query("DELETE FROM system_snapshots WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let anomaly_cutoff =
            (now - Duration::days(self.anomaly_retention_days)).timestamp_millis();
        report.anomalies_deleted = sqlx::query("DELETE FROM anomalies WHERE timestamp < ?")
            .bind(anomaly_cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if report.snapshots_deleted > 0 || report.anomalies_deleted > 0 {
            info!(
                "retention sweep removed {} snapshot(s), {} anomaly rows",
                report.snapshots_deleted, report.anomalies_deleted
            );
        }

        // size cap: shed oldest snapshots until the compacted file fits
        for _ in 0..4 {
            if self.db_size_mb() <= self.size_cap_mb as f64 {
                break;
            }
            let total: i64 = sqlx::query("SELECT COUNT(*) FROM system_snapshots")
                .fetch_one(&self.pool)
                .await?
                .get(0);
            if total == 0 {
                break;
            }
            let shed = (total / 5).max(1);
            warn!("store over size cap, dropping {shed} oldest snapshot(s)");
            report.snapshots_deleted += sqlx::query(
                "DELETE FROM system_snapshots WHERE id IN
                     (SELECT id FROM system_snapshots ORDER BY timestamp ASC LIMIT ?)",
            )
            .bind(shed)
            .execute(&self.pool)
            .await?
            .rows_affected();
            sqlx::query("VACUUM").execute(&self.pool).await?;
            report.vacuumed = true;
        }

        Ok(report)
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM system_snapshots",
        )
        .fetch_one(&self.pool)
        .await?;
        let samples: i64 = row.get(0);
        Ok(StoreStats {
            samples: samples.max(0) as u64,
            oldest: row.get::<Option<i64>, _>(1).map(ms_to_datetime),
            newest: row.get::<Option<i64>, _>(2).map(ms_to_datetime),
            db_size_mb: self.db_size_mb(),
        })
    }

    fn db_size_mb(&self) -> f64 {
        std::fs::metadata(&self.path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("store closed");
    }
}

fn map_write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::DuplicateTimestamp;
        }
        // SQLITE_FULL
        if db.code().as_deref() == Some("13") {
            return StoreError::StorageFull;
        }
    }
    StoreError::Database(e)
}

/// One (timestamp, value) row per snapshot for a primary metric. Multi-row
/// families (gpu) are averaged per snapshot.
fn series_sql(metric: MetricKind) -> String {
    let (table, column) = match metric {
        MetricKind::CpuPercent => ("cpu_metrics", "usage_percent"),
        MetricKind::RamPercent => ("ram_metrics", "usage_percent"),
        MetricKind::GpuPercent => ("gpu_metrics", "usage_percent"),
        MetricKind::DiskReadMbps => ("disk_metrics", "read_mbps"),
        MetricKind::DiskWriteMbps => ("disk_metrics", "write_mbps"),
        MetricKind::NetDownMbps => ("network_metrics", "download_mbps"),
        MetricKind::NetUpMbps => ("network_metrics", "upload_mbps"),
    };
    format!(
        "SELECT s.timestamp AS ts, AVG(m.{column}) AS value
         FROM system_snapshots s JOIN {table} m ON m.snapshot_id = s.id
         WHERE s.timestamp >= ? AND s.timestamp < ? AND m.{column} IS NOT NULL
         GROUP BY s.id"
    )
}

fn process_from_row(r: &sqlx::sqlite::SqliteRow) -> ProcessInfo {
    ProcessInfo {
        name: r.get(0),
        pid: r.get::<i64, _>(1).max(0) as u32,
        cpu_percent: r.get(2),
        memory_mb: r.get(3),
        thread_count: r.get::<i64, _>(4).max(0) as u32,
        status: r.get(5),
        started_at: r.get::<Option<i64>, _>(6).map(ms_to_datetime),
    }
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap())
}

fn time_of_day_str(t: TimeOfDay) -> &'static str {
    match t {
        TimeOfDay::Morning => "morning",
        TimeOfDay::Afternoon => "afternoon",
        TimeOfDay::Evening => "evening",
        TimeOfDay::Night => "night",
    }
}

fn parse_time_of_day(s: &str) -> TimeOfDay {
    match s {
        "morning" => TimeOfDay::Morning,
        "afternoon" => TimeOfDay::Afternoon,
        "evening" => TimeOfDay::Evening,
        _ => TimeOfDay::Night,
    }
}

fn user_action_str(a: UserAction) -> &'static str {
    match a {
        UserAction::Coding => "coding",
        UserAction::Gaming => "gaming",
        UserAction::Browsing => "browsing",
        UserAction::Streaming => "streaming",
        UserAction::Idle => "idle",
        UserAction::Unknown => "unknown",
    }
}

fn parse_user_action(s: &str) -> UserAction {
    match s {
        "coding" => UserAction::Coding,
        "gaming" => UserAction::Gaming,
        "browsing" => UserAction::Browsing,
        "streaming" => UserAction::Streaming,
        "idle" => UserAction::Idle,
        _ => UserAction::Unknown,
    }
}
