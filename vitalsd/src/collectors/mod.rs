//! Collector contract and registry
//!
//! Every collector is an idempotent sampler: it either returns its typed
//! fragment within the tick deadline or a structured failure. Collectors run
//! concurrently and own their delta state exclusively; a failing collector
//! never aborts the tick.

use crate::config::Config;
use crate::models::Fragment;
use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio::time::Instant;

pub mod context;
pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod network;
pub mod platform;
pub mod process;
pub mod ram;
pub mod tool_bridge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Unsupported,
    PermissionDenied,
    TransientError,
    MissingDependency,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unsupported => "unsupported",
            Self::PermissionDenied => "permission_denied",
            Self::TransientError => "transient_error",
            Self::MissingDependency => "missing_dependency",
        }
    }

    /// Permanent failures disable the collector for the rest of the session.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Unsupported | Self::PermissionDenied | Self::MissingDependency
        )
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {message}", kind.as_str())]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(FailureKind::Timeout, "deadline exceeded")
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unsupported, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TransientError, message)
    }

    pub fn missing_dependency(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MissingDependency, message)
    }

    /// Short reason recorded in the snapshot's collector error map.
    pub fn reason(&self) -> String {
        self.kind.as_str().to_string()
    }
}

/// Rate class a collector is sampled at. A tick at a slower class also runs
/// every faster class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Cadence {
    High,
    Medium,
    Low,
}

#[async_trait]
pub trait Collector: Send + Sync {
    /// Stable identifier, used as the error-map key and in health reporting.
    fn name(&self) -> &'static str;

    fn cadence(&self) -> Cadence;

    /// Sample once. Must return before `deadline`; a collector that knows it
    /// cannot make the deadline returns a timeout failure promptly.
    async fn sample(&self, deadline: Instant) -> Result<Fragment, Failure>;
}

/// Optional collectors are the first to go when the agent self-throttles.
const OPTIONAL_COLLECTORS: &[&str] = &["tool_bridge", "platform", "gpu"];

pub struct Registry {
    collectors: Vec<Arc<dyn Collector>>,
    disabled: RwLock<HashSet<&'static str>>,
}

impl Registry {
    pub fn from_config(config: &Config) -> Self {
        let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
        for name in &config.collectors.enabled {
            match name.as_str() {
                "cpu" => collectors.push(Arc::new(cpu::CpuCollector::new())),
                "ram" => collectors.push(Arc::new(ram::RamCollector::new())),
                "gpu" => collectors.push(Arc::new(gpu::GpuCollector::new())),
                "disk" => collectors.push(Arc::new(disk::DiskCollector::new())),
                "network" => collectors.push(Arc::new(network::NetworkCollector::new())),
                "process" => collectors.push(Arc::new(process::ProcessCollector::new(
                    config.collectors.process_top_n,
                    config.privacy.process_name_only,
                ))),
                "context" => collectors.push(Arc::new(context::ContextCollector::new())),
                other => warn!("[collectors] unknown collector in config: {other}"),
            }
        }
        if config.collectors.tool_bridge.enabled {
            collectors.push(Arc::new(tool_bridge::ToolBridgeCollector::new(
                config.collectors.tool_bridge.command.clone(),
            )));
        }
        if config.collectors.platform.enabled {
            collectors.push(Arc::new(platform::PlatformCollector::new(
                config.collectors.platform.hwmon_root.clone(),
            )));
        }
        info!("[collectors] registry built with {} collector(s)", collectors.len());
        Self {
            collectors,
            disabled: RwLock::new(HashSet::new()),
        }
    }

    #[cfg(test)]
    pub fn from_collectors(collectors: Vec<Arc<dyn Collector>>) -> Self {
        Self {
            collectors,
            disabled: RwLock::new(HashSet::new()),
        }
    }

    /// Enabled collectors that sample at `cadence` or faster.
    pub fn enabled_for(&self, cadence: Cadence) -> Vec<Arc<dyn Collector>> {
        let disabled = self.disabled.read().unwrap();
        self.collectors
            .iter()
            .filter(|c| c.cadence() <= cadence && !disabled.contains(c.name()))
            .cloned()
            .collect()
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.read().unwrap().contains(name)
    }

    /// Disable for the rest of the session. Logged once; re-enabled only by
    /// process restart.
    pub fn disable(&self, name: &'static str, reason: &str) {
        let mut disabled = self.disabled.write().unwrap();
        if disabled.insert(name) {
            warn!("[collectors] collector_disabled name={name} reason={reason}");
        }
    }

    /// Self-throttle: shed the heaviest optional collectors.
    pub fn shed_optional(&self) -> Vec<&'static str> {
        let mut shed = Vec::new();
        let enabled: Vec<&'static str> = {
            let disabled = self.disabled.read().unwrap();
            self.collectors
                .iter()
                .map(|c| c.name())
                .filter(|n| OPTIONAL_COLLECTORS.contains(n) && !disabled.contains(n))
                .collect()
        };
        for name in enabled {
            self.disable(name, "self_throttle");
            shed.push(name);
        }
        shed
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }
}

/// Seconds remaining before the deadline, clamped at zero.
pub(crate) fn remaining(deadline: Instant) -> std::time::Duration {
    deadline.saturating_duration_since(Instant::now())
}
