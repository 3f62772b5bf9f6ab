//! External tool bridge
//!
//! Runs a user-configured command that prints a JSON array of sensor
//! readings on stdout, one object per sensor:
//!
//!   [{"label": "cpu package", "temperature_celsius": 52.0, "fan_rpm": null}]
//!
//! The bridge exists for vendor tools the agent cannot talk to directly.
//! Its readings enrich the cpu/gpu fragments the same way the platform
//! bridge's do.

use super::{remaining, Cadence, Collector, Failure};
use crate::models::{Fragment, SensorReading};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;

pub struct ToolBridgeCollector {
    command: Option<String>,
}

impl ToolBridgeCollector {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Collector for ToolBridgeCollector {
    fn name(&self) -> &'static str {
        "tool_bridge"
    }

    fn cadence(&self) -> Cadence {
        Cadence::Medium
    }

    async fn sample(&self, deadline: Instant) -> Result<Fragment, Failure> {
        let budget = remaining(deadline);
        if budget.is_zero() {
            return Err(Failure::timeout());
        }
        let command = self
            .command
            .as_deref()
            .ok_or_else(|| Failure::missing_dependency("tool_bridge.command not configured"))?;
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Failure::missing_dependency("tool_bridge.command is empty"))?;

        let output = tokio::time::timeout(
            budget,
            Command::new(program).args(parts).output(),
        )
        .await
        .map_err(|_| Failure::timeout())?;

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Failure::missing_dependency(format!("{program} not found")));
            }
            Err(e) => return Err(Failure::transient(format!("{program} spawn failed: {e}"))),
        };
        if !output.status.success() {
            return Err(Failure::transient(format!(
                "{program} exited with {}",
                output.status
            )));
        }

        let readings = parse_readings(&output.stdout)?;
        Ok(Fragment::Sensors(readings))
    }
}

fn parse_readings(stdout: &[u8]) -> Result<Vec<SensorReading>, Failure> {
    serde_json::from_slice(stdout)
        .map_err(|e| Failure::transient(format!("tool output is not valid sensor JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[test]
    fn parses_sensor_json() {
        let readings = parse_readings(
            br#"[{"label": "cpu package", "temperature_celsius": 52.5},
                 {"label": "case fan", "fan_rpm": 900.0}]"#,
        )
        .unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].temperature_celsius, Some(52.5));
        assert_eq!(readings[1].fan_rpm, Some(900.0));
    }

    #[test]
    fn garbage_is_transient() {
        let err = parse_readings(b"not json").unwrap_err();
        assert_eq!(err.reason(), "transient_error");
    }

    #[tokio::test]
    async fn unconfigured_command_is_missing_dependency() {
        let collector = ToolBridgeCollector::new(None);
        let err = collector
            .sample(Instant::now() + Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "missing_dependency");
    }

    #[tokio::test]
    async fn echo_bridge_round_trip() {
        let collector = ToolBridgeCollector::new(Some(
            r#"echo [{"label":"t","temperature_celsius":40.0}]"#.to_string(),
        ));
        let fragment = collector
            .sample(Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();
        match fragment {
            Fragment::Sensors(readings) => {
                assert_eq!(readings.len(), 1);
                assert_eq!(readings[0].temperature_celsius, Some(40.0));
            }
            other => panic!("expected sensors fragment, got {other:?}"),
        }
    }
}
