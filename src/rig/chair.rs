//! The wheelchair rig: rotation detection, two wheels, and the chair body.
//!
//! Each frame runs one variable-rate update pass followed by zero or more
//! fixed-rate physics steps.  The update pass samples hand poses, estimates
//! rotation, filters, evicts history, and ticks the wheels; the physics
//! pass reads the wheel speeds committed by the update pass and moves the
//! chair.  Nothing here blocks, and nothing is shared across threads.

use tracing::debug;

use super::comfort::{ComfortEvent, ComfortMonitor};
use super::pose::{Hand, HandFrame};
use super::rotation::{RotationDetector, RotationEvent, RotationSink};
use super::vehicle::VehicleIntegrator;
use super::wheel::WheelController;
use super::math::Vec3;
use crate::config::RigConfig;

/// Everything the rig reports to the outside.
#[derive(Debug, Clone, PartialEq)]
pub enum RigEvent {
    Rotation(RotationEvent),
    Comfort(ComfortEvent),
}

impl RotationSink for Vec<RigEvent> {
    fn on_rotation(&mut self, event: RotationEvent) {
        self.push(RigEvent::Rotation(event));
    }
}

/// Orchestrates the update and physics passes for one chair.
pub struct WheelchairRig {
    pub detector: RotationDetector,
    pub left_wheel: WheelController,
    pub right_wheel: WheelController,
    pub vehicle: VehicleIntegrator,
    pub comfort: ComfortMonitor,
    events: Vec<RigEvent>,
    comfort_events: Vec<ComfortEvent>,
}

impl WheelchairRig {
    pub fn new(config: &RigConfig) -> Self {
        let vehicle = VehicleIntegrator::new(config.vehicle.clone());
        let comfort = ComfortMonitor::new(config.comfort.clone(), &vehicle);
        Self {
            detector: RotationDetector::new(config.detector.clone()),
            left_wheel: WheelController::new(Hand::Left, config.wheel.clone()),
            right_wheel: WheelController::new(Hand::Right, config.wheel.clone()),
            vehicle,
            comfort,
            events: Vec::new(),
            comfort_events: Vec::new(),
        }
    }

    /// Push new tunables into every component.  Runtime state is kept.
    pub fn apply_config(&mut self, config: &RigConfig) {
        self.detector.config = config.detector.clone();
        self.left_wheel.config = config.wheel.clone();
        self.right_wheel.config = config.wheel.clone();
        self.vehicle.config = config.vehicle.clone();
        self.comfort.config = config.comfort.clone();
        debug!("rig config applied");
    }

    // ── Passes ─────────────────────────────────────────────

    /// Variable-rate update pass.
    pub fn update(&mut self, frame: &HandFrame, now: f64, dt: f32) {
        let chair_center = self.vehicle.body.position;
        self.detector.update(frame, &chair_center, now, dt, &mut self.events);

        let axis = self.vehicle.up_axis();
        let left_center = self.vehicle.wheel_center(Hand::Left);
        let right_center = self.vehicle.wheel_center(Hand::Right);
        self.left_wheel.tick(&left_center, &axis, now, dt);
        self.right_wheel.tick(&right_center, &axis, now, dt);

        self.comfort.update(&mut self.vehicle, &mut self.comfort_events);
        self.events
            .extend(self.comfort_events.drain(..).map(RigEvent::Comfort));
    }

    /// One fixed-rate physics step.
    pub fn physics_step(&mut self, dt: f32) {
        self.vehicle
            .step(Some(&self.left_wheel), Some(&self.right_wheel), dt);
        self.left_wheel.update_visual_rotation(dt);
        self.right_wheel.update_visual_rotation(dt);
    }

    /// Take the events produced since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<RigEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Grab input ─────────────────────────────────────────

    pub fn wheel(&self, side: Hand) -> &WheelController {
        match side {
            Hand::Left => &self.left_wheel,
            Hand::Right => &self.right_wheel,
        }
    }

    fn wheel_mut(&mut self, side: Hand) -> &mut WheelController {
        match side {
            Hand::Left => &mut self.left_wheel,
            Hand::Right => &mut self.right_wheel,
        }
    }

    /// Begin a grab on `side`.  Without an explicit hand, the hand is
    /// resolved from the grab point's side of the viewer rig.
    pub fn grab_begin(&mut self, side: Hand, interactor: u32, hand: Option<Hand>, position: Vec3) -> Hand {
        let hand = hand.unwrap_or_else(|| self.resolve_hand(&position));
        self.wheel_mut(side).grab_begin(interactor, hand, position);
        hand
    }

    pub fn grab_move(&mut self, side: Hand, interactor: u32, position: Vec3) -> bool {
        self.wheel_mut(side).grab_move(interactor, position)
    }

    pub fn grab_end(&mut self, side: Hand, interactor: u32) -> bool {
        self.wheel_mut(side).grab_end(interactor)
    }

    /// Which hand a world-space point belongs to, seen from the viewer rig.
    pub fn resolve_hand(&self, point: &Vec3) -> Hand {
        Hand::from_rig_frame(&self.vehicle.viewer.position, &self.vehicle.viewer.rotation, point)
    }

    // ── Commands ───────────────────────────────────────────

    /// Stop the chair and stand it upright in place.
    pub fn reset(&mut self) {
        self.vehicle.reset();
    }

    /// Move the rider back to the play-area center and reset.
    pub fn reset_to_center(&mut self) {
        let center = self.comfort.config.play_area_center;
        self.vehicle.reset_to(&center);
    }

    pub fn set_wheelchair_mode(&mut self, active: bool) {
        self.comfort
            .set_wheelchair_mode(active, &mut self.comfort_events);
        self.events
            .extend(self.comfort_events.drain(..).map(RigEvent::Comfort));
    }

    // ── Reporting ──────────────────────────────────────────

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:vehicle {} :left-wheel {} :right-wheel {} :comfort {})",
            self.vehicle.status_sexp(),
            self.left_wheel.status_sexp(),
            self.right_wheel.status_sexp(),
            self.comfort.status_sexp(),
        )
    }

    /// Generate s-expression for IPC config.
    pub fn config_sexp(&self) -> String {
        let w = &self.left_wheel.config;
        format!(
            "(:detector {} :wheel (:radius {:.3} :sensitivity {:.2} :damping {:.2} :min-rotation-angle {:.2} :rotation-time-window {:.3}) :vehicle {} :comfort {})",
            self.detector.config_sexp(),
            w.radius,
            w.sensitivity,
            w.damping,
            w.min_rotation_angle,
            w.rotation_time_window,
            self.vehicle.config_sexp(),
            self.comfort.config_sexp(),
        )
    }
}

impl Default for WheelchairRig {
    fn default() -> Self {
        Self::new(&RigConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::math::{Quat, DEG2RAD};
    use crate::rig::pose::HandPose;

    const DT: f32 = 1.0 / 90.0;

    /// Point on the rim of `side`'s wheel at `deg` around its hub.
    fn rim(rig: &WheelchairRig, side: Hand, deg: f32) -> Vec3 {
        let r = deg * DEG2RAD;
        rig.vehicle.wheel_center(side) + Vec3::new(0.3 * r.sin(), 0.0, 0.3 * r.cos())
    }

    #[test]
    fn test_push_drives_chair_forward() {
        let mut rig = WheelchairRig::default();
        let start = rig.vehicle.body.position;
        rig.grab_begin(Hand::Right, 1, Some(Hand::Right), rim(&rig, Hand::Right, 0.0));
        rig.grab_begin(Hand::Left, 2, Some(Hand::Left), rim(&rig, Hand::Left, 0.0));

        let mut now = 0.0f64;
        for i in 1..=45 {
            now += DT as f64;
            // Right hub turns positive, left turns negative: both wheels forward
            let r = rim(&rig, Hand::Right, i as f32 * 1.0);
            let l = rim(&rig, Hand::Left, -(i as f32) * 1.0);
            // Grab points ride with the chair, so re-anchor each tick
            rig.grab_move(Hand::Right, 1, r);
            rig.grab_move(Hand::Left, 2, l);
            rig.update(&HandFrame::new(), now, DT);
            rig.physics_step(DT);
        }

        assert!(rig.right_wheel.angular_velocity() > 0.0);
        assert!(rig.left_wheel.angular_velocity() > 0.0);
        assert!(rig.vehicle.forward_speed() > 0.0);
        assert!(rig.vehicle.body.position.z > start.z);
    }

    #[test]
    fn test_idle_rig_stays_put() {
        let mut rig = WheelchairRig::default();
        for i in 0..100 {
            rig.update(&HandFrame::new(), i as f64 * DT as f64, DT);
            rig.physics_step(DT);
        }
        assert_eq!(rig.vehicle.body.position, Vec3::zeros());
        assert!(rig.drain_events().is_empty());
    }

    #[test]
    fn test_pose_frames_produce_rotation_events() {
        let mut rig = WheelchairRig::default();
        for i in 0..10 {
            let t = i as f64 * DT as f64;
            let r = (90.0 * t as f32) * DEG2RAD;
            let pos = Vec3::new(0.3 * r.sin(), 0.0, 0.3 * r.cos());
            let mut frame = HandFrame::new();
            frame.set(Hand::Right, HandPose::new(pos, Quat::identity(), t));
            rig.update(&frame, t, DT);
        }
        let events = rig.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, RigEvent::Rotation(RotationEvent::RightWheel(_)))));
        assert!(rig.drain_events().is_empty());
    }

    #[test]
    fn test_grab_resolves_hand_from_rig_frame() {
        let mut rig = WheelchairRig::default();
        let hand = rig.grab_begin(Hand::Left, 4, None, Vec3::new(-0.4, 0.5, 0.1));
        assert_eq!(hand, Hand::Left);
        let hand = rig.grab_begin(Hand::Right, 5, None, Vec3::new(0.4, 0.5, 0.1));
        assert_eq!(hand, Hand::Right);
        assert!(rig.wheel(Hand::Left).is_grabbed());
        assert!(rig.grab_end(Hand::Left, 4));
        assert!(!rig.grab_end(Hand::Left, 4));
    }

    #[test]
    fn test_reset_twice_matches_once() {
        let mut rig = WheelchairRig::default();
        rig.vehicle.body.linear_velocity = Vec3::new(0.0, 0.0, 2.0);
        rig.vehicle.body.angular_velocity = Vec3::new(0.0, 30.0, 0.0);
        rig.reset();
        let once = rig.vehicle.body.clone();
        rig.reset();
        assert_eq!(once, rig.vehicle.body);
        assert_eq!(rig.vehicle.current_velocity(), Vec3::zeros());
    }

    #[test]
    fn test_wheelchair_mode_event() {
        let mut rig = WheelchairRig::default();
        rig.set_wheelchair_mode(true);
        let events = rig.drain_events();
        assert_eq!(events, vec![RigEvent::Comfort(ComfortEvent::ActiveChanged(true))]);
    }

    #[test]
    fn test_apply_config() {
        let mut rig = WheelchairRig::default();
        let mut config = RigConfig::default();
        config.vehicle.max_speed = 1.5;
        config.wheel.sensitivity = 4.0;
        rig.apply_config(&config);
        assert_eq!(rig.vehicle.config.max_speed, 1.5);
        assert_eq!(rig.right_wheel.config.sensitivity, 4.0);
        assert!(rig.config_sexp().contains(":sensitivity 4.00"));
    }

    #[test]
    fn test_status_sexp_parses() {
        let rig = WheelchairRig::default();
        assert!(lexpr::from_str(&rig.status_sexp()).is_ok());
        assert!(lexpr::from_str(&rig.config_sexp()).is_ok());
    }
}
