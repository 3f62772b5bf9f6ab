//! Context collector
//!
//! Clock-derived fields plus process-name heuristics for user activity.
//! On a headless host there is no input-idle counter to read, so idleness
//! is inferred from the presence of interactive applications: while at
//! least one is running the user counts as active and the idle clock is
//! zero; once they are gone the idle clock runs from the last sighting.

use super::{remaining, Cadence, Collector, Failure};
use crate::models::{Fragment, SystemContext, TimeOfDay, UserAction};
use async_trait::async_trait;
use chrono::Local;
use std::sync::{Arc, Mutex};
use sysinfo::{ProcessRefreshKind, RefreshKind, System, UpdateKind};
use tokio::time::Instant;

const BROWSERS: &[&str] = &["firefox", "chrome", "chromium", "brave", "edge", "vivaldi"];
const EDITORS: &[&str] = &["code", "vim", "nvim", "emacs", "idea", "pycharm", "zed", "helix"];
const GAMES: &[&str] = &["steam", "lutris", "heroic", "gamescope"];
const MEDIA: &[&str] = &["vlc", "mpv", "spotify", "obs", "plex"];
const LOCKERS: &[&str] = &["i3lock", "swaylock", "gnome-screensaver", "xsecurelock", "hyprlock"];

pub struct ContextCollector {
    sys: Arc<Mutex<System>>,
    last_active: Arc<Mutex<Option<Instant>>>,
}

impl ContextCollector {
    pub fn new() -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::new()
                .with_processes(ProcessRefreshKind::new().with_exe(UpdateKind::Never)),
        );
        Self {
            sys: Arc::new(Mutex::new(sys)),
            last_active: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for ContextCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for ContextCollector {
    fn name(&self) -> &'static str {
        "context"
    }

    fn cadence(&self) -> Cadence {
        Cadence::High
    }

    async fn sample(&self, deadline: Instant) -> Result<Fragment, Failure> {
        if remaining(deadline).is_zero() {
            return Err(Failure::timeout());
        }
        let sys = Arc::clone(&self.sys);
        let last_active = Arc::clone(&self.last_active);
        let context = tokio::task::spawn_blocking(move || {
            let mut sys = sys.lock().unwrap();
            sys.refresh_processes();
            let names: Vec<String> = sys
                .processes()
                .values()
                .map(|p| p.name().to_lowercase())
                .collect();

            let action = classify_action(&names);
            let screen_locked = names
                .iter()
                .any(|n| LOCKERS.iter().any(|l| n.contains(l)));

            let now = Instant::now();
            let mut last_active = last_active.lock().unwrap();
            let interactive = action != UserAction::Unknown;
            if interactive {
                *last_active = Some(now);
            }
            let idle_seconds = match *last_active {
                Some(at) => now.duration_since(at).as_secs(),
                None => 0,
            };
            let user_active = interactive && !screen_locked;

            let local = Local::now();
            SystemContext {
                user_active,
                idle_seconds,
                screen_locked,
                time_of_day: TimeOfDay::from_hour(chrono::Timelike::hour(&local)),
                day_of_week: local.format("%A").to_string(),
                user_action: if user_active { action } else { idle_or_unknown(idle_seconds) },
            }
        })
        .await
        .map_err(|e| Failure::transient(format!("context sampling task failed: {e}")))?;

        Ok(Fragment::Context(context))
    }
}

fn idle_or_unknown(idle_seconds: u64) -> UserAction {
    if idle_seconds >= 300 {
        UserAction::Idle
    } else {
        UserAction::Unknown
    }
}

/// First matching category wins, games before browsers so a running game
/// is not misread as browsing because of its launcher.
fn classify_action(names: &[String]) -> UserAction {
    let any = |set: &[&str]| names.iter().any(|n| set.iter().any(|s| n.contains(s)));
    if any(GAMES) {
        UserAction::Gaming
    } else if any(EDITORS) {
        UserAction::Coding
    } else if any(MEDIA) {
        UserAction::Streaming
    } else if any(BROWSERS) {
        UserAction::Browsing
    } else {
        UserAction::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classifies_by_process_names() {
        assert_eq!(
            classify_action(&names(&["systemd", "firefox"])),
            UserAction::Browsing
        );
        assert_eq!(
            classify_action(&names(&["nvim", "firefox"])),
            UserAction::Coding
        );
        assert_eq!(
            classify_action(&names(&["steam", "firefox"])),
            UserAction::Gaming
        );
        assert_eq!(
            classify_action(&names(&["systemd", "sshd"])),
            UserAction::Unknown
        );
    }

    #[test]
    fn idle_threshold() {
        assert_eq!(idle_or_unknown(301), UserAction::Idle);
        assert_eq!(idle_or_unknown(30), UserAction::Unknown);
    }

    #[tokio::test]
    async fn samples_a_context_fragment() {
        let collector = ContextCollector::new();
        let fragment = collector
            .sample(Instant::now() + tokio::time::Duration::from_secs(5))
            .await
            .unwrap();
        match fragment {
            Fragment::Context(context) => {
                assert!(!context.day_of_week.is_empty());
            }
            other => panic!("expected context fragment, got {other:?}"),
        }
    }
}
