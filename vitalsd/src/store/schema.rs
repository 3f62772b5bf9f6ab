//! Schema versions
//!
//! Forward-only migration ladder. `schema_metadata.version` records the
//! version last applied; a file written by a newer build is refused at open.

pub const LATEST_VERSION: i64 = 1;

/// Applied in order inside one transaction per version.
pub const MIGRATIONS: &[(i64, &str)] = &[(1, V1)];

const V1: &str = r#"
CREATE TABLE IF NOT EXISTS schema_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
);

CREATE TABLE IF NOT EXISTS system_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER UNIQUE NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
    collection_duration_ms INTEGER NOT NULL DEFAULT 0,
    collector_errors TEXT
);
CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp ON system_snapshots(timestamp);

CREATE TABLE IF NOT EXISTS cpu_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL REFERENCES system_snapshots(id) ON DELETE CASCADE,
    usage_percent REAL NOT NULL,
    frequency_mhz REAL,
    temperature_celsius REAL,
    logical_count INTEGER NOT NULL,
    physical_count INTEGER NOT NULL,
    load_1 REAL,
    load_5 REAL,
    load_15 REAL
);
CREATE INDEX IF NOT EXISTS idx_cpu_snapshot ON cpu_metrics(snapshot_id);

CREATE TABLE IF NOT EXISTS cpu_core_usage (
    cpu_metric_id INTEGER NOT NULL REFERENCES cpu_metrics(id) ON DELETE CASCADE,
    core_index INTEGER NOT NULL,
    usage_percent REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_core_metric ON cpu_core_usage(cpu_metric_id);

CREATE TABLE IF NOT EXISTS ram_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL REFERENCES system_snapshots(id) ON DELETE CASCADE,
    total_gb REAL NOT NULL,
    used_gb REAL NOT NULL,
    available_gb REAL NOT NULL,
    cached_gb REAL NOT NULL,
    swap_total_gb REAL NOT NULL,
    swap_used_gb REAL NOT NULL,
    usage_percent REAL
);
CREATE INDEX IF NOT EXISTS idx_ram_snapshot ON ram_metrics(snapshot_id);

CREATE TABLE IF NOT EXISTS gpu_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL REFERENCES system_snapshots(id) ON DELETE CASCADE,
    gpu_index INTEGER NOT NULL,
    name TEXT NOT NULL,
    usage_percent REAL NOT NULL,
    memory_used_gb REAL NOT NULL,
    memory_total_gb REAL NOT NULL,
    temperature_celsius REAL,
    fan_rpm REAL,
    power_watts REAL,
    core_clock_mhz REAL,
    memory_clock_mhz REAL
);
CREATE INDEX IF NOT EXISTS idx_gpu_snapshot ON gpu_metrics(snapshot_id);

CREATE TABLE IF NOT EXISTS disk_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL REFERENCES system_snapshots(id) ON DELETE CASCADE,
    read_mbps REAL NOT NULL,
    write_mbps REAL NOT NULL,
    queue_length REAL NOT NULL,
    io_ops_per_sec REAL NOT NULL,
    warming_up INTEGER NOT NULL DEFAULT 0,
    devices_json TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_disk_snapshot ON disk_metrics(snapshot_id);

CREATE TABLE IF NOT EXISTS network_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL REFERENCES system_snapshots(id) ON DELETE CASCADE,
    download_mbps REAL NOT NULL,
    upload_mbps REAL NOT NULL,
    connections_active INTEGER NOT NULL,
    bytes_sent INTEGER NOT NULL,
    bytes_received INTEGER NOT NULL,
    packets_sent INTEGER NOT NULL,
    packets_received INTEGER NOT NULL,
    errors INTEGER NOT NULL,
    warming_up INTEGER NOT NULL DEFAULT 0,
    interfaces_json TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_network_snapshot ON network_metrics(snapshot_id);

CREATE TABLE IF NOT EXISTS process_info (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL REFERENCES system_snapshots(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    pid INTEGER NOT NULL,
    cpu_percent REAL NOT NULL,
    memory_mb REAL NOT NULL,
    thread_count INTEGER NOT NULL,
    status TEXT NOT NULL,
    started_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_process_snapshot ON process_info(snapshot_id);

CREATE TABLE IF NOT EXISTS system_context (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL REFERENCES system_snapshots(id) ON DELETE CASCADE,
    user_active INTEGER NOT NULL,
    idle_seconds INTEGER NOT NULL,
    screen_locked INTEGER NOT NULL,
    time_of_day TEXT NOT NULL,
    day_of_week TEXT NOT NULL,
    user_action TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_context_snapshot ON system_context(snapshot_id);

CREATE TABLE IF NOT EXISTS anomalies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    metric_name TEXT NOT NULL,
    current_value REAL NOT NULL,
    expected_value REAL NOT NULL,
    deviation_std REAL NOT NULL,
    severity TEXT NOT NULL,
    context_json TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_anomalies_timestamp ON anomalies(timestamp);
CREATE INDEX IF NOT EXISTS idx_anomalies_metric ON anomalies(metric_name);

CREATE TABLE IF NOT EXISTS baselines (
    metric_name TEXT PRIMARY KEY,
    mean REAL NOT NULL,
    std REAL NOT NULL,
    sample_count INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;
