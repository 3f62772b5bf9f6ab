//! Threshold detector with hysteresis
//!
//! A crossing only fires after the value holds at or above the level for
//! `sustain_window` consecutive samples, and the state only clears after the
//! value holds below warn for the same window. A single-sample spike through
//! a threshold never alerts.

use crate::config::ThresholdPair;
use crate::models::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Warn,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Clear,
    Active(Level),
}

/// Fired events carry the severity of the sustained level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdEvent {
    pub severity: Severity,
}

#[derive(Debug)]
pub struct ThresholdDetector {
    pair: ThresholdPair,
    sustain_window: usize,
    state: State,
    above_warn: usize,
    above_critical: usize,
    below_warn: usize,
}

impl ThresholdDetector {
    pub fn new(pair: ThresholdPair, sustain_window: usize) -> Self {
        Self {
            pair,
            sustain_window: sustain_window.max(1),
            state: State::Clear,
            above_warn: 0,
            above_critical: 0,
            below_warn: 0,
        }
    }

    /// Whether the value currently sits at or above the warn level. Used by
    /// the spike detector's severity rule.
    pub fn above_warn(&self, value: f64) -> bool {
        value >= self.pair.warn
    }

    pub fn is_active(&self) -> bool {
        self.state != State::Clear
    }

    /// Observe one sample. Returns an event on the sample that completes a
    /// sustained crossing; duplicates are suppressed until the state clears.
    pub fn observe(&mut self, value: f64) -> Option<ThresholdEvent> {
        if value >= self.pair.warn {
            self.above_warn += 1;
            self.below_warn = 0;
        } else {
            self.above_warn = 0;
            self.above_critical = 0;
            self.below_warn += 1;
            if self.below_warn >= self.sustain_window {
                self.state = State::Clear;
            }
            return None;
        }
        if value >= self.pair.critical {
            self.above_critical += 1;
        } else {
            self.above_critical = 0;
        }

        if self.above_critical >= self.sustain_window && self.state != State::Active(Level::Critical)
        {
            self.state = State::Active(Level::Critical);
            return Some(ThresholdEvent {
                severity: Severity::Critical,
            });
        }
        if self.above_warn >= self.sustain_window && self.state == State::Clear {
            self.state = State::Active(Level::Warn);
            return Some(ThresholdEvent {
                severity: Severity::Warn,
            });
        }
        None
    }

    pub fn warn_level(&self) -> f64 {
        self.pair.warn
    }

    pub fn critical_level(&self) -> f64 {
        self.pair.critical
    }
}
