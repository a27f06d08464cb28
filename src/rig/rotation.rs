//! Hand-rim rotation estimation from tracked hand poses.
//!
//! Each tick the detector appends the latest pose per hand to its history,
//! turns the newest sample pairs into a signed rotation about the up axis
//! around the wheel center, and derives a combined estimate when both
//! hands push in sync.  Estimates above the emit threshold are delivered
//! synchronously to a [`RotationSink`].

use tracing::{debug, trace};

use super::filter::MovingAverage;
use super::history::{PoseHistory, DEFAULT_CAPACITY};
use super::math::{clamp01, project_on_plane, signed_angle, up, Vec3, MIN_PROJECTED_LEN};
use super::pose::{Hand, HandFrame, PoseSample};

/// Maximum number of consecutive sample pairs analysed per tick.
pub const MAX_PAIRS: usize = 4;

/// Minimum history length before any estimate is produced.
pub const MIN_SAMPLES: usize = 3;

/// Sample pairs at most this far apart (seconds) are skipped.
pub const MIN_PAIR_DT: f32 = 0.001;

/// Confidence an estimate must exceed to be emitted.
pub const EMIT_CONFIDENCE: f32 = 0.5;

/// Confidence both hands must exceed before a combined estimate is tried.
pub const BIMANUAL_MIN_CONFIDENCE: f32 = 0.3;

/// Velocity difference (deg/s) at which synchronization reaches zero.
pub const SYNC_VELOCITY_SCALE: f32 = 10.0;

/// Synchronization a combined estimate must exceed.
pub const MIN_SYNCHRONIZATION: f32 = 0.5;

/// Angle variance (deg²) at which confidence reaches zero.
pub const VARIANCE_SCALE: f32 = 100.0;

// ── Estimate ───────────────────────────────────────────────

/// Rotation of one hand (or both) about the up axis over the recent window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationEstimate {
    /// Summed signed angle over accepted pairs (degrees).
    pub angle: f32,
    /// Degrees per second.
    pub velocity: f32,
    /// Change of filtered velocity per second (deg/s²).
    pub acceleration: f32,
    /// Rotation axis; always world up.
    pub axis: Vec3,
    /// Consistency of the accepted angle deltas, in [0, 1].
    pub confidence: f32,
    /// Evaluation time (seconds).
    pub timestamp: f64,
}

impl RotationEstimate {
    /// Neutral estimate: no rotation, no confidence.
    pub fn zero() -> Self {
        Self {
            angle: 0.0,
            velocity: 0.0,
            acceleration: 0.0,
            axis: up(),
            confidence: 0.0,
            timestamp: 0.0,
        }
    }

    pub fn sexp(&self) -> String {
        format!(
            "(:angle {:.3} :velocity {:.3} :acceleration {:.3} :confidence {:.3} :timestamp {:.3})",
            self.angle, self.velocity, self.acceleration, self.confidence, self.timestamp,
        )
    }
}

impl Default for RotationEstimate {
    fn default() -> Self {
        Self::zero()
    }
}

// ── Events ─────────────────────────────────────────────────

/// Qualifying estimates, one variant per output channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RotationEvent {
    LeftWheel(RotationEstimate),
    RightWheel(RotationEstimate),
    Combined(RotationEstimate),
}

impl RotationEvent {
    /// Channel name for IPC.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::LeftWheel(_) => "left",
            Self::RightWheel(_) => "right",
            Self::Combined(_) => "combined",
        }
    }

    pub fn estimate(&self) -> &RotationEstimate {
        match self {
            Self::LeftWheel(e) | Self::RightWheel(e) | Self::Combined(e) => e,
        }
    }
}

/// Receiver for rotation events, invoked within the producing tick.
pub trait RotationSink {
    fn on_rotation(&mut self, event: RotationEvent);
}

impl RotationSink for Vec<RotationEvent> {
    fn on_rotation(&mut self, event: RotationEvent) {
        self.push(event);
    }
}

// ── Config ─────────────────────────────────────────────────

/// Tunables for rotation detection.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Detection accuracy scale (carried for clients; not used by the estimator).
    pub detection_accuracy: f32,
    /// Minimum implied angular rate (deg/s) for a sample pair to count.
    pub min_rotation_threshold: f32,
    /// History retention window (seconds).
    pub continuous_rotation_window: f64,
    /// Derive a combined estimate from both hands.
    pub detect_bimanual: bool,
    /// Noise filter strength (carried for clients).
    pub noise_filter_strength: f32,
    /// Smoothing filter strength (carried for clients).
    pub smoothing_filter_strength: f32,
    /// Hard cap on pose samples per hand.
    pub history_capacity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            detection_accuracy: 1.0,
            min_rotation_threshold: 5.0,
            continuous_rotation_window: 0.4,
            detect_bimanual: true,
            noise_filter_strength: 3.0,
            smoothing_filter_strength: 5.0,
            history_capacity: DEFAULT_CAPACITY,
        }
    }
}

// ── Estimation ─────────────────────────────────────────────

/// Estimate rotation about the up axis from `samples` (oldest first).
///
/// Looks at up to [`MAX_PAIRS`] of the newest consecutive pairs around
/// `center`.  A pair is discarded when it is too close in time, when
/// either projected offset is degenerate, or when its implied rate is
/// not above `min_rate` (deg/s).  `fallback_dt` stands in for the total
/// time if the accepted pairs somehow sum to zero.  Left-hand results are
/// negated to match the wheel handedness convention.
pub fn estimate_rotation<'a, I>(
    samples: I,
    hand: Hand,
    center: &Vec3,
    min_rate: f32,
    fallback_dt: f32,
    now: f64,
) -> RotationEstimate
where
    I: DoubleEndedIterator<Item = &'a PoseSample> + ExactSizeIterator,
{
    if samples.len() < MIN_SAMPLES {
        return RotationEstimate::zero();
    }

    let axis = up();
    let newest: Vec<&PoseSample> = samples.rev().take(MAX_PAIRS + 1).collect();

    let mut angles = Vec::with_capacity(MAX_PAIRS);
    let mut total_time = 0.0f32;
    for pair in newest.windows(2) {
        let (curr, prev) = (pair[0], pair[1]);
        let pair_dt = (curr.timestamp - prev.timestamp) as f32;
        if !(pair_dt > MIN_PAIR_DT) {
            continue;
        }

        let prev_proj = project_on_plane(&(prev.position - center), &axis);
        let curr_proj = project_on_plane(&(curr.position - center), &axis);
        if prev_proj.norm() <= MIN_PROJECTED_LEN || curr_proj.norm() <= MIN_PROJECTED_LEN {
            continue;
        }

        let angle = signed_angle(&prev_proj, &curr_proj, &axis);
        if angle.is_finite() && angle.abs() > min_rate * pair_dt {
            angles.push(angle);
            total_time += pair_dt;
        }
    }

    if angles.is_empty() {
        return RotationEstimate::zero();
    }

    let count = angles.len() as f32;
    let total_angle: f32 = angles.iter().sum();
    let mean = total_angle / count;
    let variance = angles.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / count;

    let elapsed = if total_time > 0.0 { total_time } else { fallback_dt };
    let velocity = if elapsed > 0.0 { total_angle / elapsed } else { 0.0 };

    let sign = match hand {
        Hand::Left => -1.0,
        Hand::Right => 1.0,
    };

    RotationEstimate {
        angle: total_angle * sign,
        velocity: velocity * sign,
        acceleration: 0.0,
        axis,
        confidence: clamp01(1.0 - variance / VARIANCE_SCALE),
        timestamp: now,
    }
}

/// Combine per-hand estimates when both are confident and in sync.
pub fn combine_bimanual(left: &RotationEstimate, right: &RotationEstimate, now: f64) -> RotationEstimate {
    if !(left.confidence > BIMANUAL_MIN_CONFIDENCE && right.confidence > BIMANUAL_MIN_CONFIDENCE) {
        return RotationEstimate::zero();
    }

    let synchronization = clamp01(1.0 - (left.velocity - right.velocity).abs() / SYNC_VELOCITY_SCALE);
    if synchronization <= MIN_SYNCHRONIZATION {
        return RotationEstimate::zero();
    }

    RotationEstimate {
        angle: (left.angle + right.angle) * 0.5,
        velocity: (left.velocity + right.velocity) * 0.5,
        acceleration: 0.0,
        axis: up(),
        confidence: clamp01((left.confidence + right.confidence) * 0.5 * synchronization),
        timestamp: now,
    }
}

// ── Per-hand tracking ──────────────────────────────────────

/// History, filter, and latest estimate for one hand.
#[derive(Debug, Clone)]
struct HandRotationState {
    history: PoseHistory,
    filter: MovingAverage,
    current: RotationEstimate,
}

impl HandRotationState {
    fn new(window_s: f64, capacity: usize) -> Self {
        Self {
            history: PoseHistory::new(window_s, capacity),
            filter: MovingAverage::new(),
            current: RotationEstimate::zero(),
        }
    }

    /// Replace the velocity with its moving average and derive acceleration.
    fn apply_filter(&mut self, previous_velocity: f32, dt: f32) {
        let filtered = self.filter.push(self.current.velocity);
        self.current.velocity = filtered;
        self.current.acceleration = if dt > 0.0 {
            let a = (filtered - previous_velocity) / dt;
            if a.is_finite() {
                a
            } else {
                0.0
            }
        } else {
            0.0
        };
    }
}

// ── Detector ───────────────────────────────────────────────

/// Per-hand rotation detection with bimanual fusion.
pub struct RotationDetector {
    /// Configuration.
    pub config: DetectorConfig,
    left: HandRotationState,
    right: HandRotationState,
    combined: RotationEstimate,
}

impl RotationDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let window = config.continuous_rotation_window;
        let cap = config.history_capacity;
        Self {
            config,
            left: HandRotationState::new(window, cap),
            right: HandRotationState::new(window, cap),
            combined: RotationEstimate::zero(),
        }
    }

    fn hand_state(&self, hand: Hand) -> &HandRotationState {
        match hand {
            Hand::Left => &self.left,
            Hand::Right => &self.right,
        }
    }

    fn hand_state_mut(&mut self, hand: Hand) -> &mut HandRotationState {
        match hand {
            Hand::Left => &mut self.left,
            Hand::Right => &mut self.right,
        }
    }

    /// Run one update tick.
    ///
    /// Order: record poses, estimate, emit qualifying events, filter
    /// velocities, evict stale history.  Events carry the unfiltered
    /// estimates; [`current`](Self::current) returns the filtered ones.
    pub fn update(
        &mut self,
        frame: &HandFrame,
        center: &Vec3,
        now: f64,
        dt: f32,
        sink: &mut dyn RotationSink,
    ) {
        let window = self.config.continuous_rotation_window;
        let cap = self.config.history_capacity;
        let min_rate = self.config.min_rotation_threshold;

        let mut previous = [0.0f32; 2];
        for (i, hand) in [Hand::Left, Hand::Right].into_iter().enumerate() {
            let hs = self.hand_state_mut(hand);
            hs.history.window_s = window;
            hs.history.capacity = cap;
            if let Some(pose) = frame.get(hand) {
                hs.history.push(pose);
            }
            previous[i] = hs.current.velocity;
            hs.current = estimate_rotation(hs.history.iter(), hand, center, min_rate, dt, now);
        }

        self.combined = if self.config.detect_bimanual {
            combine_bimanual(&self.left.current, &self.right.current, now)
        } else {
            RotationEstimate::zero()
        };

        if self.left.current.confidence > EMIT_CONFIDENCE {
            trace!(velocity = self.left.current.velocity, "left wheel rotation");
            sink.on_rotation(RotationEvent::LeftWheel(self.left.current));
        }
        if self.right.current.confidence > EMIT_CONFIDENCE {
            trace!(velocity = self.right.current.velocity, "right wheel rotation");
            sink.on_rotation(RotationEvent::RightWheel(self.right.current));
        }
        if self.combined.confidence > EMIT_CONFIDENCE {
            trace!(velocity = self.combined.velocity, "combined rotation");
            sink.on_rotation(RotationEvent::Combined(self.combined));
        }

        self.left.apply_filter(previous[0], dt);
        self.right.apply_filter(previous[1], dt);

        self.left.history.evict(now);
        self.right.history.evict(now);
    }

    /// Latest filtered estimate for a hand.
    pub fn current(&self, hand: Hand) -> &RotationEstimate {
        &self.hand_state(hand).current
    }

    /// Latest combined estimate.
    pub fn combined(&self) -> &RotationEstimate {
        &self.combined
    }

    /// Number of buffered pose samples for a hand.
    pub fn history_len(&self, hand: Hand) -> usize {
        self.hand_state(hand).history.len()
    }

    /// Drop all history, filter state, and estimates.
    pub fn reset(&mut self) {
        let window = self.config.continuous_rotation_window;
        let cap = self.config.history_capacity;
        self.left = HandRotationState::new(window, cap);
        self.right = HandRotationState::new(window, cap);
        self.combined = RotationEstimate::zero();
        debug!("rotation detector reset");
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:left {} :left-samples {} :right {} :right-samples {} :combined {})",
            self.left.current.sexp(),
            self.left.history.len(),
            self.right.current.sexp(),
            self.right.history.len(),
            self.combined.sexp(),
        )
    }

    /// Generate s-expression for IPC config.
    pub fn config_sexp(&self) -> String {
        format!(
            "(:detection-accuracy {:.2} :min-rotation-threshold {:.2} :continuous-rotation-window {:.3} :detect-bimanual {} :noise-filter-strength {:.2} :smoothing-filter-strength {:.2} :history-capacity {})",
            self.config.detection_accuracy,
            self.config.min_rotation_threshold,
            self.config.continuous_rotation_window,
            if self.config.detect_bimanual { "t" } else { "nil" },
            self.config.noise_filter_strength,
            self.config.smoothing_filter_strength,
            self.config.history_capacity,
        )
    }
}

impl Default for RotationDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

// ── Test helpers ───────────────────────────────────────────

/// Pose on a horizontal circle around `center`, `deg` measured from +Z toward +X.
#[cfg(test)]
pub(crate) fn circle_pose(center: &Vec3, radius: f32, deg: f32, t: f64) -> super::pose::HandPose {
    use super::math::{Quat, DEG2RAD};
    let r = deg * DEG2RAD;
    let pos = center + Vec3::new(radius * r.sin(), 0.0, radius * r.cos());
    super::pose::HandPose::new(pos, Quat::identity(), t)
}

#[cfg(test)]
fn circle_history(rate_deg_s: f32, n: usize, dt: f64) -> PoseHistory {
    let mut h = PoseHistory::new(10.0, 64);
    for i in 0..n {
        let t = i as f64 * dt;
        h.push(&circle_pose(&Vec3::zeros(), 0.3, rate_deg_s * t as f32, t));
    }
    h
}

// ── Tests ──────────────────────────────────────────────────
