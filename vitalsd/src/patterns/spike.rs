//! Spike detector
//!
//! Flags samples further than k standard deviations from the rolling mean.
//! Independent of threshold state and silent in the baseline cold-start
//! region. Consecutive spiking samples collapse into one event; the state
//! clears on the first non-spiking sample.

use super::baseline::Baseline;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeEvent {
    pub expected: f64,
    pub deviation_std: f64,
}

#[derive(Debug)]
pub struct SpikeDetector {
    k: f64,
    active: bool,
}

impl SpikeDetector {
    pub fn new(k: f64) -> Self {
        Self { k, active: false }
    }

    pub fn observe(&mut self, value: f64, baseline: Option<Baseline>) -> Option<SpikeEvent> {
        let Some(baseline) = baseline else {
            self.active = false;
            return None;
        };
        if baseline.std <= f64::EPSILON {
            // a flat series deviating at all would be infinitely many sigmas;
            // treat it as no information rather than an alert storm
            self.active = false;
            return None;
        }
        let deviation = (value - baseline.mean).abs() / baseline.std;
        if deviation > self.k {
            if self.active {
                return None;
            }
            self.active = true;
            return Some(SpikeEvent {
                expected: baseline.mean,
                deviation_std: deviation,
            });
        }
        self.active = false;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(mean: f64, std: f64) -> Option<Baseline> {
        Some(Baseline {
            mean,
            std,
            sample_count: 100,
        })
    }

    #[test]
    fn fires_beyond_k_sigma() {
        let mut d = SpikeDetector::new(3.0);
        assert!(d.observe(50.0, baseline(50.0, 5.0)).is_none());
        assert!(d.observe(64.0, baseline(50.0, 5.0)).is_none());
        let event = d.observe(70.0, baseline(50.0, 5.0)).unwrap();
        assert_eq!(event.expected, 50.0);
        assert!((event.deviation_std - 4.0).abs() < 1e-9);
    }

    #[test]
    fn silent_without_baseline() {
        let mut d = SpikeDetector::new(3.0);
        assert!(d.observe(1000.0, None).is_none());
    }

    #[test]
    fn consecutive_spikes_collapse() {
        let mut d = SpikeDetector::new(3.0);
        assert!(d.observe(80.0, baseline(50.0, 5.0)).is_some());
        assert!(d.observe(85.0, baseline(50.0, 5.0)).is_none());
        assert!(d.observe(90.0, baseline(50.0, 5.0)).is_none());
        // back to normal clears the state
        assert!(d.observe(51.0, baseline(50.0, 5.0)).is_none());
        assert!(d.observe(80.0, baseline(50.0, 5.0)).is_some());
    }

    #[test]
    fn flat_baseline_is_ignored() {
        let mut d = SpikeDetector::new(3.0);
        assert!(d.observe(51.0, baseline(50.0, 0.0)).is_none());
    }
}
