//! Rolling baseline
//!
//! Mean and standard deviation over the last W samples of one metric.
//! Produces nothing until the cold-start minimum is reached; a baseline
//! persisted by a previous run can stand in until then.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    pub std: f64,
    pub sample_count: u64,
}

#[derive(Debug)]
pub struct BaselineTracker {
    window: VecDeque<f64>,
    capacity: usize,
    min_samples: usize,
    /// Baseline restored from the store, used until the live window warms up.
    seed: Option<Baseline>,
}

impl BaselineTracker {
    pub fn new(capacity: usize, min_samples: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            min_samples: min_samples.max(2),
            seed: None,
        }
    }

    pub fn seed(&mut self, baseline: Baseline) {
        if baseline.sample_count >= self.min_samples as u64 {
            self.seed = Some(baseline);
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Current baseline, or None during cold start with no usable seed.
    pub fn current(&self) -> Option<Baseline> {
        if self.window.len() < self.min_samples {
            return self.seed;
        }
        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let variance = self
            .window
            .iter()
            .map(|v| {
                let d = v - mean;
                d * d
            })
            .sum::<f64>()
            / (n - 1.0);
        Some(Baseline {
            mean,
            std: variance.sqrt(),
            sample_count: self.window.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_yields_nothing() {
        let mut tracker = BaselineTracker::new(100, 30);
        for _ in 0..29 {
            tracker.push(50.0);
        }
        assert!(tracker.current().is_none());
        tracker.push(50.0);
        assert!(tracker.current().is_some());
    }

    #[test]
    fn seed_covers_cold_start() {
        let mut tracker = BaselineTracker::new(100, 30);
        tracker.seed(Baseline {
            mean: 40.0,
            std: 3.0,
            sample_count: 500,
        });
        tracker.push(41.0);
        let baseline = tracker.current().unwrap();
        assert_eq!(baseline.mean, 40.0);
        // an under-sampled seed is ignored
        let mut fresh = BaselineTracker::new(100, 30);
        fresh.seed(Baseline {
            mean: 40.0,
            std: 3.0,
            sample_count: 5,
        });
        assert!(fresh.current().is_none());
    }

    #[test]
    fn mean_and_std_over_window() {
        let mut tracker = BaselineTracker::new(4, 2);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            tracker.push(v);
        }
        // window holds the last four: 5, 5, 7, 9
        let baseline = tracker.current().unwrap();
        assert!((baseline.mean - 6.5).abs() < 1e-9);
        assert!((baseline.std - 1.914854).abs() < 1e-5);
        assert_eq!(baseline.sample_count, 4);
    }

    #[test]
    fn constant_series_has_zero_std() {
        let mut tracker = BaselineTracker::new(50, 2);
        for _ in 0..50 {
            tracker.push(10.0);
        }
        let baseline = tracker.current().unwrap();
        assert_eq!(baseline.mean, 10.0);
        assert_eq!(baseline.std, 0.0);
    }
}
