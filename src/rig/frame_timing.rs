//! Tick timing for the update and physics passes.
//!
//! Keeps a rolling window of pass durations and counts frames that ran
//! over the frame budget.

use std::collections::VecDeque;

/// Rolling timing window over recent frames.
#[derive(Debug)]
pub struct FrameTiming {
    update_ms: VecDeque<f64>,
    physics_ms: VecDeque<f64>,
    /// Samples kept per pass.
    pub window_size: usize,
    /// Frame budget in milliseconds (11.1 at 90 Hz).
    pub budget_ms: f64,
    pub total_frames: u64,
    pub over_budget_frames: u64,
    pub physics_steps: u64,
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::new(600, 1000.0 / 90.0)
    }
}

impl FrameTiming {
    pub fn new(window_size: usize, budget_ms: f64) -> Self {
        Self {
            update_ms: VecDeque::with_capacity(window_size),
            physics_ms: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            budget_ms,
            total_frames: 0,
            over_budget_frames: 0,
            physics_steps: 0,
        }
    }

    /// Record one frame: its update pass time and the total time of the
    /// `steps` physics steps it ran.
    pub fn record(&mut self, update_ms: f64, physics_ms: f64, steps: u32) {
        push_bounded(&mut self.update_ms, update_ms, self.window_size);
        push_bounded(&mut self.physics_ms, physics_ms, self.window_size);
        self.total_frames += 1;
        self.physics_steps += u64::from(steps);
        if update_ms + physics_ms > self.budget_ms {
            self.over_budget_frames += 1;
        }
    }

    pub fn stats(&self) -> FrameTimingStats {
        let update = sorted(&self.update_ms);
        let physics = sorted(&self.physics_ms);
        FrameTimingStats {
            update_p50: percentile(&update, 50.0),
            update_p99: percentile(&update, 99.0),
            physics_p50: percentile(&physics, 50.0),
            physics_p99: percentile(&physics, 99.0),
            over_budget_pct: if self.total_frames > 0 {
                self.over_budget_frames as f64 / self.total_frames as f64 * 100.0
            } else {
                0.0
            },
            total_frames: self.total_frames,
            over_budget_frames: self.over_budget_frames,
            physics_steps: self.physics_steps,
        }
    }

    /// Format stats as an s-expression for IPC.
    pub fn stats_sexp(&self) -> String {
        let s = self.stats();
        format!(
            "(:update-p50 {:.3} :update-p99 {:.3} :physics-p50 {:.3} :physics-p99 {:.3} :over-budget-pct {:.1} :total-frames {} :over-budget-frames {} :physics-steps {})",
            s.update_p50, s.update_p99, s.physics_p50, s.physics_p99,
            s.over_budget_pct, s.total_frames, s.over_budget_frames, s.physics_steps,
        )
    }
}

/// Computed timing statistics (milliseconds).
#[derive(Debug, Clone)]
pub struct FrameTimingStats {
    pub update_p50: f64,
    pub update_p99: f64,
    pub physics_p50: f64,
    pub physics_p99: f64,
    pub over_budget_pct: f64,
    pub total_frames: u64,
    pub over_budget_frames: u64,
    pub physics_steps: u64,
}

fn push_bounded(samples: &mut VecDeque<f64>, value: f64, cap: usize) {
    samples.push_back(value);
    while samples.len() > cap {
        samples.pop_front();
    }
}

fn sorted(samples: &VecDeque<f64>) -> Vec<f64> {
    let mut v: Vec<f64> = samples.iter().copied().collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p / 100.0).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
