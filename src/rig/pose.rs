//! Tracked hand poses: the per-tick input boundary of the rig.
//!
//! Clients deliver at most one pose per hand per frame. A missing pose
//! means the hand was not tracked this frame, which is not an error.

use super::math::{Quat, Vec3};

// ── Hand enum ──────────────────────────────────────────────

/// Which hand (and, by the same convention, which wheel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    /// Parse "left" / "right".
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    /// Resolve handedness from a world-space point seen from the viewer rig.
    ///
    /// Points on the rig's local -X side are left.
    pub fn from_rig_frame(rig_position: &Vec3, rig_rotation: &Quat, point: &Vec3) -> Self {
        let local = rig_rotation.inverse() * (point - rig_position);
        if local.x < 0.0 {
            Self::Left
        } else {
            Self::Right
        }
    }
}

// ── Pose input ─────────────────────────────────────────────

/// Raw pose of one tracked hand for the current tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandPose {
    /// Position in meters.
    pub position: Vec3,
    /// Orientation of the hand.
    pub orientation: Quat,
    /// Monotonic timestamp in seconds.
    pub timestamp: f64,
}

impl HandPose {
    pub fn new(position: Vec3, orientation: Quat, timestamp: f64) -> Self {
        Self {
            position,
            orientation,
            timestamp,
        }
    }
}

/// Recorded pose sample with derived linear velocity. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub position: Vec3,
    pub orientation: Quat,
    /// Meters per second, relative to the previous recorded sample.
    pub velocity: Vec3,
    pub timestamp: f64,
}

impl PoseSample {
    /// Record `pose`, deriving velocity from the previous sample if any.
    ///
    /// Velocity is zero without a predecessor or when elapsed time is not positive.
    pub fn record(pose: &HandPose, previous: Option<&PoseSample>) -> Self {
        let velocity = match previous {
            Some(prev) => {
                let dt = (pose.timestamp - prev.timestamp) as f32;
                if dt > 0.0 {
                    (pose.position - prev.position) / dt
                } else {
                    Vec3::zeros()
                }
            }
            None => Vec3::zeros(),
        };
        Self {
            position: pose.position,
            orientation: pose.orientation,
            velocity,
            timestamp: pose.timestamp,
        }
    }
}

// ── Per-frame latch ────────────────────────────────────────

/// Poses delivered for the current frame, one slot per hand.
///
/// Filled by the input layer between frames and drained by the update pass.
#[derive(Debug, Clone, Default)]
pub struct HandFrame {
    left: Option<HandPose>,
    right: Option<HandPose>,
}

impl HandFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a pose; a later pose for the same hand replaces the earlier one.
    pub fn set(&mut self, hand: Hand, pose: HandPose) {
        match hand {
            Hand::Left => self.left = Some(pose),
            Hand::Right => self.right = Some(pose),
        }
    }

    /// Drop any latched pose for `hand`.
    pub fn clear(&mut self, hand: Hand) {
        match hand {
            Hand::Left => self.left = None,
            Hand::Right => self.right = None,
        }
    }

    pub fn get(&self, hand: Hand) -> Option<&HandPose> {
        match hand {
            Hand::Left => self.left.as_ref(),
            Hand::Right => self.right.as_ref(),
        }
    }

    /// Take both slots, leaving the frame empty.
    pub fn take(&mut self) -> HandFrame {
        std::mem::take(self)
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}
