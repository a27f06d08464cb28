//! Demo backend — a synthetic rider pushing both rims.
//!
//! Runs the headless loop and, before every frame, moves two interactors
//! around the hand rims in repeated strokes: grab near the back of the
//! rim, sweep forward, let go, recover.  Useful for smoke runs and for
//! watching the event stream with an IPC client attached.

use tracing::{debug, info};

use super::{headless, IpcConfig};
use crate::config::RigConfig;
use crate::rig::math::{Vec3, DEG2RAD};
use crate::rig::Hand;
use crate::state::RigState;

/// Interactor ids used by the synthetic hands.
const LEFT_INTERACTOR: u32 = 101;
const RIGHT_INTERACTOR: u32 = 102;

/// Stroke shape of the synthetic rider.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Seconds the rim is held per stroke.
    pub stroke_secs: f64,
    /// Seconds between strokes with both hands off.
    pub recover_secs: f64,
    /// Degrees swept per stroke.
    pub sweep_deg: f32,
    /// Left sweep as a fraction of the right; below 1 curves left.
    pub left_ratio: f32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            stroke_secs: 0.5,
            recover_secs: 0.4,
            sweep_deg: 60.0,
            left_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stroke {
    Pushing { since: f64 },
    Recovering { since: f64 },
}

/// Drives grab input on the rig from a clock.
#[derive(Debug, Clone)]
pub struct DemoPusher {
    pub config: DemoConfig,
    stroke: Option<Stroke>,
    strokes: u64,
}

impl DemoPusher {
    pub fn new(config: DemoConfig) -> Self {
        Self {
            config,
            stroke: None,
            strokes: 0,
        }
    }

    pub fn strokes(&self) -> u64 {
        self.strokes
    }

    /// Rim point of `side` at `deg` about the hub, in world space.  The
    /// right hub turns positive for forward motion and the left negative.
    fn rim_point(state: &RigState, side: Hand, deg: f32) -> Vec3 {
        let radius = state.rig.wheel(side).config.radius;
        let signed = match side {
            Hand::Left => -deg,
            Hand::Right => deg,
        } * DEG2RAD;
        let local = Vec3::new(radius * signed.sin(), 0.0, radius * signed.cos());
        state.rig.vehicle.wheel_center(side) + state.rig.vehicle.body.rotation * local
    }

    fn begin_stroke(&mut self, state: &mut RigState, now: f64) {
        let half = self.config.sweep_deg * 0.5;
        let left = Self::rim_point(state, Hand::Left, -half * self.config.left_ratio);
        let right = Self::rim_point(state, Hand::Right, -half);
        state.rig.grab_begin(Hand::Left, LEFT_INTERACTOR, Some(Hand::Left), left);
        state.rig.grab_begin(Hand::Right, RIGHT_INTERACTOR, Some(Hand::Right), right);
        self.stroke = Some(Stroke::Pushing { since: now });
        self.strokes += 1;
        debug!(stroke = self.strokes, "demo stroke begin");
    }

    fn end_stroke(&mut self, state: &mut RigState, now: f64) {
        state.rig.grab_end(Hand::Left, LEFT_INTERACTOR);
        state.rig.grab_end(Hand::Right, RIGHT_INTERACTOR);
        self.stroke = Some(Stroke::Recovering { since: now });
    }

    /// Advance the synthetic hands to `now`.
    pub fn drive(&mut self, state: &mut RigState, now: f64) {
        match self.stroke {
            None => self.begin_stroke(state, now),
            Some(Stroke::Recovering { since }) => {
                if now - since >= self.config.recover_secs {
                    self.begin_stroke(state, now);
                }
            }
            Some(Stroke::Pushing { since }) => {
                let progress = ((now - since) / self.config.stroke_secs).min(1.0) as f32;
                let deg = self.config.sweep_deg * (progress - 0.5);
                let left = Self::rim_point(state, Hand::Left, deg * self.config.left_ratio);
                let right = Self::rim_point(state, Hand::Right, deg);
                state.rig.grab_move(Hand::Left, LEFT_INTERACTOR, left);
                state.rig.grab_move(Hand::Right, RIGHT_INTERACTOR, right);
                if progress >= 1.0 {
                    self.end_stroke(state, now);
                }
            }
        }
    }
}

impl Default for DemoPusher {
    fn default() -> Self {
        Self::new(DemoConfig::default())
    }
}

/// Run the headless loop with the demo rider attached.
pub fn run(config: RigConfig, ipc_config: IpcConfig, exit_after: Option<u64>) -> anyhow::Result<()> {
    let mut pusher = DemoPusher::default();
    info!(
        stroke_secs = pusher.config.stroke_secs,
        sweep_deg = pusher.config.sweep_deg,
        "demo rider attached"
    );
    headless::run_with(config, ipc_config, exit_after, move |state, now| {
        pusher.drive(state, now)
    })
}
