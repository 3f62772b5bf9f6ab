//! Process collector
//!
//! Reports the top-N processes by CPU, ties broken by memory then name.
//! Only process names are captured by default; with the privacy guard
//! relaxed the name is taken from the executable file name instead, still
//! never the full path or command line.

use super::{remaining, Cadence, Collector, Failure};
use crate::models::{sort_processes, Fragment, ProcessInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tokio::time::Instant;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub struct ProcessCollector {
    sys: Arc<Mutex<System>>,
    top_n: usize,
    name_only: bool,
}

impl ProcessCollector {
    pub fn new(top_n: usize, name_only: bool) -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::everything()),
        );
        Self {
            sys: Arc::new(Mutex::new(sys)),
            top_n,
            name_only,
        }
    }
}

#[async_trait]
impl Collector for ProcessCollector {
    fn name(&self) -> &'static str {
        "process"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Medium
    }

    async fn sample(&self, deadline: Instant) -> Result<Fragment, Failure> {
        if remaining(deadline).is_zero() {
            return Err(Failure::timeout());
        }
        let sys = Arc::clone(&self.sys);
        let top_n = self.top_n;
        let name_only = self.name_only;
        let processes = tokio::task::spawn_blocking(move || {
            let mut sys = sys.lock().unwrap();
            sys.refresh_processes();

            let mut processes: Vec<ProcessInfo> = sys
                .processes()
                .iter()
                .map(|(pid, process)| {
                    let name = if name_only {
                        process.name().to_string()
                    } else {
                        process
                            .exe()
                            .and_then(|p| p.file_name())
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_else(|| process.name().to_string())
                    };
                    ProcessInfo {
                        name,
                        pid: pid.as_u32(),
                        cpu_percent: process.cpu_usage() as f64,
                        memory_mb: process.memory() as f64 / BYTES_PER_MB,
                        thread_count: thread_count(pid.as_u32()),
                        status: process.status().to_string().to_lowercase(),
                        started_at: DateTime::<Utc>::from_timestamp(
                            process.start_time() as i64,
                            0,
                        ),
                    }
                })
                .collect();
            sort_processes(&mut processes);
            processes.truncate(top_n);
            processes
        })
        .await
        .map_err(|e| Failure::transient(format!("process sampling task failed: {e}")))?;

        Ok(Fragment::Processes(processes))
    }
}

/// Thread count from /proc, since sysinfo does not expose it. Defaults to 1.
fn thread_count(pid: u32) -> u32 {
    std::fs::read_to_string(format!("/proc/{pid}/status"))
        .ok()
        .and_then(|content| parse_thread_count(&content))
        .unwrap_or(1)
}

fn parse_thread_count(content: &str) -> Option<u32> {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("Threads:") {
            return rest.trim().parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[test]
    fn parses_thread_count() {
        let content = "Name:\tvitalsd\nState:\tS (sleeping)\nThreads:\t17\n";
        assert_eq!(parse_thread_count(content), Some(17));
        assert_eq!(parse_thread_count("Name:\tx\n"), None);
    }

    #[tokio::test]
    async fn respects_top_n_and_ordering() {
        let collector = ProcessCollector::new(5, true);
        let fragment = collector
            .sample(Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();
        match fragment {
            Fragment::Processes(processes) => {
                assert!(processes.len() <= 5);
                for pair in processes.windows(2) {
                    assert!(pair[0].cpu_percent >= pair[1].cpu_percent);
                }
            }
            other => panic!("expected processes fragment, got {other:?}"),
        }
    }
}
