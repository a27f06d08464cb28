//! Bounded pose history per hand.
//!
//! Samples are evicted oldest-first once they fall outside the time
//! window, then further while the buffer exceeds its hard cap.

use std::collections::VecDeque;

use super::pose::{HandPose, PoseSample};

/// Default retention window in seconds.
pub const DEFAULT_WINDOW_S: f64 = 0.4;

/// Hard cap on retained samples.
pub const DEFAULT_CAPACITY: usize = 20;

/// Time-windowed ring buffer of recent pose samples.
#[derive(Debug, Clone)]
pub struct PoseHistory {
    samples: VecDeque<PoseSample>,
    /// Retention window (seconds).
    pub window_s: f64,
    /// Maximum number of samples kept after eviction.
    pub capacity: usize,
}

impl PoseHistory {
    pub fn new(window_s: f64, capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            window_s,
            capacity,
        }
    }

    /// Record a pose, deriving its velocity from the newest sample.
    pub fn push(&mut self, pose: &HandPose) -> PoseSample {
        let sample = PoseSample::record(pose, self.samples.back());
        self.samples.push_back(sample);
        sample
    }

    /// Evict samples older than `now - window_s`, then enforce the cap.
    pub fn evict(&mut self, now: f64) {
        let cutoff = now - self.window_s;
        while self
            .samples
            .front()
            .is_some_and(|s| s.timestamp < cutoff)
        {
            self.samples.pop_front();
        }
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Newest sample.
    pub fn latest(&self) -> Option<&PoseSample> {
        self.samples.back()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &PoseSample> + ExactSizeIterator {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for PoseHistory {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_S, DEFAULT_CAPACITY)
    }
}
