//! Daemon configuration
//!
//! Loaded once at startup from an optional TOML file plus a few environment
//! overrides, then passed into components as an immutable `Arc<Config>`.
//! Components never consult ambient state after construction.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub collection: CollectionConfig,
    pub collectors: CollectorsConfig,
    pub store: StoreConfig,
    pub ring: RingConfig,
    pub http: HttpConfig,
    pub patterns: PatternsConfig,
    pub logging: LoggingConfig,
    pub privacy: PrivacyConfig,
    pub training: TrainingConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub high_interval_sec: u64,
    pub medium_interval_sec: u64,
    pub low_interval_sec: u64,
    pub very_low_interval_sec: u64,
    /// Fraction of the interval a tick may spend collecting.
    pub tick_budget_ratio: f64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            high_interval_sec: 3,
            medium_interval_sec: 15,
            low_interval_sec: 60,
            very_low_interval_sec: 300,
            tick_budget_ratio: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorsConfig {
    pub enabled: Vec<String>,
    pub process_top_n: usize,
    pub tool_bridge: ToolBridgeConfig,
    pub platform: PlatformConfig,
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            enabled: ["cpu", "ram", "gpu", "disk", "network", "process", "context"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            process_top_n: 15,
            tool_bridge: ToolBridgeConfig::default(),
            platform: PlatformConfig::default(),
        }
    }
}

/// External sensor tool bridge. Disabled unless a command is configured.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolBridgeConfig {
    pub enabled: bool,
    /// Command producing a JSON array of sensor readings on stdout.
    pub command: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub enabled: bool,
    pub hwmon_root: PathBuf,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hwmon_root: PathBuf::from("/sys/class/hwmon"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub retention_days: i64,
    pub anomaly_retention_days: i64,
    pub size_cap_mb: u64,
    /// Consecutive write failures before the store is reported degraded.
    pub write_failure_threshold: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/system_stats.db"),
            retention_days: 90,
            anomaly_retention_days: 365,
            size_cap_mb: 2048,
            write_failure_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    pub capacity: usize,
    pub subscriber_capacity: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: 600,
            subscriber_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: SocketAddr,
    pub request_timeout_sec: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8001".parse().unwrap(),
            request_timeout_sec: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatternsConfig {
    pub window_samples: usize,
    pub spike_k: f64,
    pub sustain_window: usize,
    /// Samples required before a baseline is considered usable.
    pub baseline_min_samples: usize,
    pub thresholds: BTreeMap<String, ThresholdPair>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ThresholdPair {
    pub warn: f64,
    pub critical: f64,
}

impl Default for PatternsConfig {
    fn default() -> Self {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            "cpu_percent".to_string(),
            ThresholdPair {
                warn: 85.0,
                critical: 95.0,
            },
        );
        thresholds.insert(
            "ram_percent".to_string(),
            ThresholdPair {
                warn: 85.0,
                critical: 95.0,
            },
        );
        thresholds.insert(
            "gpu_percent".to_string(),
            ThresholdPair {
                warn: 90.0,
                critical: 98.0,
            },
        );
        Self {
            window_samples: 720,
            spike_k: 3.0,
            sustain_window: 10,
            baseline_min_samples: 30,
            thresholds,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
    pub rotate_mb: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            rotate_mb: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// When true only process names are captured, never paths or command lines.
    pub process_name_only: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            process_name_only: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub minimum_samples: u64,
    pub minimum_hours: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            minimum_samples: 1000,
            minimum_hours: 12.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_rss_mb: u64,
    pub max_cpu_percent: f64,
    /// Seconds the caps must be exceeded before self-throttling kicks in.
    pub overrun_grace_sec: u64,
    pub shutdown_grace_sec: u64,
    pub drain_budget_sec: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_rss_mb: 500,
            max_cpu_percent: 2.0,
            overrun_grace_sec: 30,
            shutdown_grace_sec: 10,
            drain_budget_sec: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load from an optional TOML file, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(bind) = std::env::var("VITALS_HTTP_BIND") {
            if let Ok(addr) = bind.parse() {
                self.http.bind = addr;
            }
        }
        if let Ok(path) = std::env::var("VITALS_DB_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("VITALS_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.collection;
        for (name, value) in [
            ("collection.high_interval_sec", c.high_interval_sec),
            ("collection.medium_interval_sec", c.medium_interval_sec),
            ("collection.low_interval_sec", c.low_interval_sec),
            ("collection.very_low_interval_sec", c.very_low_interval_sec),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be > 0")));
            }
        }
        if !(c.tick_budget_ratio > 0.0 && c.tick_budget_ratio <= 1.0) {
            return Err(ConfigError::Invalid(
                "collection.tick_budget_ratio must be in (0, 1]".to_string(),
            ));
        }
        if c.medium_interval_sec < c.high_interval_sec
            || c.low_interval_sec < c.medium_interval_sec
        {
            return Err(ConfigError::Invalid(
                "collection intervals must be ordered high <= medium <= low".to_string(),
            ));
        }
        if self.ring.capacity == 0 {
            return Err(ConfigError::Invalid("ring.capacity must be > 0".to_string()));
        }
        if self.collectors.process_top_n == 0 || self.collectors.process_top_n > 100 {
            return Err(ConfigError::Invalid(
                "collectors.process_top_n must be in 1..=100".to_string(),
            ));
        }
        for (metric, pair) in &self.patterns.thresholds {
            if pair.critical < pair.warn {
                return Err(ConfigError::Invalid(format!(
                    "patterns.thresholds.{metric}: critical must be >= warn"
                )));
            }
        }
        Ok(())
    }

    /// Wall-clock budget for one tick at the given interval.
    pub fn tick_budget(&self, interval_sec: u64) -> std::time::Duration {
        let secs = interval_sec as f64 * self.collection.tick_budget_ratio;
        std::time::Duration::from_millis((secs * 1000.0) as u64)
    }
}
