//! Push-rim wheel controller.
//!
//! Each wheel is a Released/Grabbed state machine driven by grab-begin,
//! grab-move, and grab-end from the interaction layer.  While grabbed the
//! grab point's motion around the wheel center becomes a target angular
//! velocity; while released the velocity decays toward zero.

use tracing::{debug, trace};

use super::math::{lerp, project_on_plane, signed_angle, Vec3, DEG2RAD, MIN_PROJECTED_LEN, RAD2DEG};
use super::pose::Hand;

// ── Config ─────────────────────────────────────────────────

/// Per-wheel tunables.
#[derive(Debug, Clone)]
pub struct WheelConfig {
    /// Wheel radius in meters.
    pub radius: f32,
    /// Multiplier from grab angular rate to wheel angular velocity.
    pub sensitivity: f32,
    /// Decay rate toward zero while released (per second).
    pub damping: f32,
    /// Minimum grab rotation rate (deg/s) that counts as a push.
    pub min_rotation_angle: f32,
    /// Retention window for recorded hand movements (seconds).
    pub rotation_time_window: f64,
    /// Blend rate toward the target velocity while grabbed (per second).
    pub grab_lag_rate: f32,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            radius: 0.3,
            sensitivity: 2.0,
            damping: 3.0,
            min_rotation_angle: 10.0,
            rotation_time_window: 0.3,
            grab_lag_rate: 10.0,
        }
    }
}

// ── Grab state ─────────────────────────────────────────────

/// Grab state of one wheel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GrabState {
    Released,
    Grabbed {
        /// Interactor holding the rim.
        interactor: u32,
        /// Hand the interactor belongs to.
        hand: Hand,
        /// Grab point at the previous tick.
        previous: Vec3,
        /// Latest reported grab point.
        current: Vec3,
    },
}

impl GrabState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Released => "released",
            Self::Grabbed { .. } => "grabbed",
        }
    }
}

/// One accepted push movement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandMovement {
    pub position: Vec3,
    pub time: f64,
    /// Signed angle of the movement (degrees).
    pub angle: f32,
}

// ── Controller ─────────────────────────────────────────────

/// State of one push-rim wheel.
#[derive(Debug, Clone)]
pub struct WheelController {
    /// Which side of the chair this wheel is on.
    pub side: Hand,
    /// Configuration.
    pub config: WheelConfig,
    state: GrabState,
    /// rad/s
    angular_velocity: f32,
    /// Degrees of accepted grab rotation since creation.
    accumulated_rotation: f32,
    /// Cosmetic rim angle (degrees, wrapped to [0, 360)).
    visual_rotation: f32,
    left_movements: Vec<HandMovement>,
    right_movements: Vec<HandMovement>,
}

impl WheelController {
    pub fn new(side: Hand, config: WheelConfig) -> Self {
        Self {
            side,
            config,
            state: GrabState::Released,
            angular_velocity: 0.0,
            accumulated_rotation: 0.0,
            visual_rotation: 0.0,
            left_movements: Vec::new(),
            right_movements: Vec::new(),
        }
    }

    /// Begin a grab.  A grab by a different interactor replaces the current one.
    pub fn grab_begin(&mut self, interactor: u32, hand: Hand, position: Vec3) {
        debug!(wheel = self.side.as_str(), interactor, hand = hand.as_str(), "wheel grabbed");
        self.state = GrabState::Grabbed {
            interactor,
            hand,
            previous: position,
            current: position,
        };
    }

    /// Report the grab point of the holding interactor.  Returns false if
    /// the wheel is released or held by someone else.
    pub fn grab_move(&mut self, interactor: u32, position: Vec3) -> bool {
        match &mut self.state {
            GrabState::Grabbed {
                interactor: holder,
                current,
                ..
            } if *holder == interactor => {
                *current = position;
                true
            }
            _ => false,
        }
    }

    /// End the grab held by `interactor` and forget recorded movements.
    pub fn grab_end(&mut self, interactor: u32) -> bool {
        match self.state {
            GrabState::Grabbed { interactor: holder, .. } if holder == interactor => {
                self.state = GrabState::Released;
                self.left_movements.clear();
                self.right_movements.clear();
                debug!(wheel = self.side.as_str(), interactor, "wheel released");
                true
            }
            _ => false,
        }
    }

    /// Variable-rate tick.  `center` and `axis` are the wheel's world
    /// center and local up axis.
    pub fn tick(&mut self, center: &Vec3, axis: &Vec3, now: f64, dt: f32) {
        if let GrabState::Grabbed {
            hand,
            previous,
            current,
            ..
        } = self.state
        {
            self.detect_rotation(hand, &previous, &current, center, axis, now, dt);
            if let GrabState::Grabbed { previous, .. } = &mut self.state {
                *previous = current;
            }
        } else {
            self.angular_velocity = lerp(self.angular_velocity, 0.0, dt * self.config.damping);
        }

        self.evict_movements(now);
    }

    #[allow(clippy::too_many_arguments)]
    fn detect_rotation(
        &mut self,
        hand: Hand,
        previous: &Vec3,
        current: &Vec3,
        center: &Vec3,
        axis: &Vec3,
        now: f64,
        dt: f32,
    ) {
        if !(dt > 0.0) {
            return;
        }

        let prev_proj = project_on_plane(&(previous - center), axis);
        let curr_proj = project_on_plane(&(current - center), axis);
        if prev_proj.norm() <= MIN_PROJECTED_LEN || curr_proj.norm() <= MIN_PROJECTED_LEN {
            return;
        }

        let angle = signed_angle(&prev_proj, &curr_proj, axis);
        if !(angle.abs() > self.config.min_rotation_angle * dt) {
            return;
        }

        let movement = HandMovement {
            position: *current,
            time: now,
            angle,
        };
        match hand {
            Hand::Left => self.left_movements.push(movement),
            Hand::Right => self.right_movements.push(movement),
        }

        let mut target = angle * DEG2RAD / dt * self.config.sensitivity;
        if self.side == Hand::Left {
            target = -target;
        }
        self.angular_velocity = lerp(self.angular_velocity, target, dt * self.config.grab_lag_rate);
        self.accumulated_rotation += angle;
        trace!(wheel = self.side.as_str(), angle, target, "push");
    }

    fn evict_movements(&mut self, now: f64) {
        let cutoff = now - self.config.rotation_time_window;
        self.left_movements.retain(|m| m.time >= cutoff);
        self.right_movements.retain(|m| m.time >= cutoff);
    }

    /// Advance the cosmetic rim angle.  Never feeds back into velocity.
    /// Rim speed over radius is the angular velocity itself.
    pub fn update_visual_rotation(&mut self, dt: f32) {
        let next = self.visual_rotation + self.angular_velocity * dt * RAD2DEG;
        if next.is_finite() {
            self.visual_rotation = next.rem_euclid(360.0);
        }
    }

    /// Current angular velocity (rad/s).
    pub fn angular_velocity(&self) -> f32 {
        self.angular_velocity
    }

    /// Rim surface speed (m/s).
    pub fn linear_speed(&self) -> f32 {
        self.angular_velocity * self.config.radius
    }

    pub fn accumulated_rotation(&self) -> f32 {
        self.accumulated_rotation
    }

    pub fn visual_rotation(&self) -> f32 {
        self.visual_rotation
    }

    pub fn state(&self) -> &GrabState {
        &self.state
    }

    pub fn is_grabbed(&self) -> bool {
        matches!(self.state, GrabState::Grabbed { .. })
    }

    /// Recorded movements for pushes made by `hand`.
    pub fn movements(&self, hand: Hand) -> &[HandMovement] {
        match hand {
            Hand::Left => &self.left_movements,
            Hand::Right => &self.right_movements,
        }
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        let holder = match self.state {
            GrabState::Grabbed { interactor, hand, .. } => {
                format!(" :interactor {} :hand {}", interactor, hand.as_str())
            }
            GrabState::Released => String::new(),
        };
        format!(
            "(:side {} :state {}{} :angular-velocity {:.3} :linear-speed {:.3} :accumulated-rotation {:.1} :visual-rotation {:.1})",
            self.side.as_str(),
            self.state.as_str(),
            holder,
            self.angular_velocity,
            self.linear_speed(),
            self.accumulated_rotation,
            self.visual_rotation,
        )
    }
}

#[cfg(test)]
fn rim_point(deg: f32) -> Vec3 {
    let r = deg * DEG2RAD;
    Vec3::new(0.3 * r.sin(), 0.0, 0.3 * r.cos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::math::up;

    const DT: f32 = 1.0 / 90.0;

    /// Push the rim by `step_deg` per tick for `ticks` ticks.
    fn push(wheel: &mut WheelController, interactor: u32, start_deg: f32, step_deg: f32, ticks: usize, t0: f64) -> f64 {
        let mut t = t0;
        for i in 1..=ticks {
            wheel.grab_move(interactor, rim_point(start_deg + step_deg * i as f32));
            t += DT as f64;
            wheel.tick(&Vec3::zeros(), &up(), t, DT);
        }
        t
    }

    #[test]
    fn test_state_transitions() {
        let mut w = WheelController::new(Hand::Right, WheelConfig::default());
        assert!(!w.is_grabbed());
        assert_eq!(w.state().as_str(), "released");
        w.grab_begin(7, Hand::Right, rim_point(0.0));
        assert!(w.is_grabbed());
        assert!(!w.grab_move(8, rim_point(5.0)));
        assert!(!w.grab_end(8));
        assert!(w.is_grabbed());
        assert!(w.grab_end(7));
        assert!(!w.is_grabbed());
        assert!(!w.grab_end(7));
    }

    #[test]
    fn test_grabbed_push_right_wheel() {
        let mut w = WheelController::new(Hand::Right, WheelConfig::default());
        w.grab_begin(1, Hand::Right, rim_point(0.0));
        push(&mut w, 1, 0.0, 1.0, 1, 0.0);
        // target = 1° * deg2rad * 90 * 2 = π, blended by 10/90
        let expected = std::f32::consts::PI * (10.0 / 90.0);
        assert!((w.angular_velocity() - expected).abs() < 1e-3, "{}", w.angular_velocity());
        assert!((w.accumulated_rotation() - 1.0).abs() < 1e-3);
        assert_eq!(w.movements(Hand::Right).len(), 1);
        assert!(w.movements(Hand::Left).is_empty());
    }

    #[test]
    fn test_left_wheel_is_negated() {
        let mut l = WheelController::new(Hand::Left, WheelConfig::default());
        let mut r = WheelController::new(Hand::Right, WheelConfig::default());
        l.grab_begin(1, Hand::Left, rim_point(0.0));
        r.grab_begin(2, Hand::Right, rim_point(0.0));
        push(&mut l, 1, 0.0, 1.0, 20, 0.0);
        push(&mut r, 2, 0.0, 1.0, 20, 0.0);
        assert!(r.angular_velocity() > 0.0);
        assert!((l.angular_velocity() + r.angular_velocity()).abs() < 1e-4);
        // Bucketed by the pushing hand, not the wheel side
        assert_eq!(l.movements(Hand::Left).len(), 20);
        assert!(l.movements(Hand::Right).is_empty());
    }

    #[test]
    fn test_velocity_converges_to_target() {
        let mut w = WheelController::new(Hand::Right, WheelConfig::default());
        w.grab_begin(1, Hand::Right, rim_point(0.0));
        push(&mut w, 1, 0.0, 1.0, 200, 0.0);
        assert!((w.angular_velocity() - std::f32::consts::PI).abs() < 1e-2);
    }

    #[test]
    fn test_small_motion_ignored() {
        let mut w = WheelController::new(Hand::Right, WheelConfig::default());
        w.grab_begin(1, Hand::Right, rim_point(0.0));
        // 0.05° per tick is under 10 deg/s * dt
        push(&mut w, 1, 0.0, 0.05, 10, 0.0);
        assert_eq!(w.angular_velocity(), 0.0);
        assert!(w.movements(Hand::Right).is_empty());
    }

    #[test]
    fn test_grab_point_on_axis_ignored() {
        let mut w = WheelController::new(Hand::Right, WheelConfig::default());
        w.grab_begin(1, Hand::Right, Vec3::new(0.0, 0.2, 0.0));
        w.grab_move(1, Vec3::new(0.0, 0.4, 0.0));
        w.tick(&Vec3::zeros(), &up(), DT as f64, DT);
        assert_eq!(w.angular_velocity(), 0.0);
    }

    #[test]
    fn test_released_decay_is_monotonic() {
        let mut w = WheelController::new(Hand::Right, WheelConfig::default());
        w.grab_begin(1, Hand::Right, rim_point(0.0));
        let t = push(&mut w, 1, 0.0, 1.0, 60, 0.0);
        w.grab_end(1);
        let mut prev = w.angular_velocity();
        assert!(prev > 0.0);
        for i in 1..200 {
            w.tick(&Vec3::zeros(), &up(), t + i as f64 * DT as f64, DT);
            let v = w.angular_velocity();
            assert!(v >= 0.0 && v <= prev);
            prev = v;
        }
        assert!(prev < 0.05);
    }

    #[test]
    fn test_large_dt_blend_is_clamped() {
        // 10 * 0.5 = 5 would overshoot; the blend saturates at the target
        let mut w = WheelController::new(Hand::Right, WheelConfig::default());
        w.grab_begin(1, Hand::Right, rim_point(0.0));
        w.grab_move(1, rim_point(30.0));
        w.tick(&Vec3::zeros(), &up(), 0.5, 0.5);
        let target = 30.0 * DEG2RAD / 0.5 * 2.0;
        assert!((w.angular_velocity() - target).abs() < 1e-4);

        w.grab_end(1);
        w.tick(&Vec3::zeros(), &up(), 1.0, 0.5);
        assert_eq!(w.angular_velocity(), 0.0);
    }

    #[test]
    fn test_zero_dt_is_harmless() {
        let mut w = WheelController::new(Hand::Right, WheelConfig::default());
        w.grab_begin(1, Hand::Right, rim_point(0.0));
        w.grab_move(1, rim_point(20.0));
        w.tick(&Vec3::zeros(), &up(), 0.0, 0.0);
        assert!(w.angular_velocity().is_finite());
        assert_eq!(w.angular_velocity(), 0.0);
    }

    #[test]
    fn test_grab_end_clears_movements() {
        let mut w = WheelController::new(Hand::Right, WheelConfig::default());
        w.grab_begin(1, Hand::Left, rim_point(0.0));
        push(&mut w, 1, 0.0, 2.0, 5, 0.0);
        assert!(!w.movements(Hand::Left).is_empty());
        w.grab_end(1);
        assert!(w.movements(Hand::Left).is_empty());
        assert!(w.movements(Hand::Right).is_empty());
    }

    #[test]
    fn test_movements_evicted_after_window() {
        let mut w = WheelController::new(Hand::Right, WheelConfig::default());
        w.grab_begin(1, Hand::Right, rim_point(0.0));
        let t = push(&mut w, 1, 0.0, 2.0, 3, 0.0);
        assert_eq!(w.movements(Hand::Right).len(), 3);
        // Hold still past the window
        w.tick(&Vec3::zeros(), &up(), t + 0.5, DT);
        assert!(w.movements(Hand::Right).is_empty());
        assert!(w.is_grabbed());
    }

    #[test]
    fn test_visual_rotation_has_no_feedback() {
        let mut w = WheelController::new(Hand::Right, WheelConfig::default());
        w.grab_begin(1, Hand::Right, rim_point(0.0));
        push(&mut w, 1, 0.0, 1.0, 30, 0.0);
        let v = w.angular_velocity();
        w.update_visual_rotation(0.1);
        assert!((w.visual_rotation() - (v * 0.1 * RAD2DEG).rem_euclid(360.0)).abs() < 1e-3);
        assert_eq!(w.angular_velocity(), v);
    }

    #[test]
    fn test_visual_rotation_ignores_radius() {
        let mut small = WheelController::new(Hand::Right, WheelConfig { radius: 0.1, ..WheelConfig::default() });
        let mut large = WheelController::new(Hand::Right, WheelConfig { radius: 0.9, ..WheelConfig::default() });
        for w in [&mut small, &mut large] {
            w.grab_begin(1, Hand::Right, rim_point(0.0));
            push(w, 1, 0.0, 1.0, 30, 0.0);
        }
        let (vs, vl) = (small.angular_velocity(), large.angular_velocity());
        small.update_visual_rotation(0.1);
        large.update_visual_rotation(0.1);
        assert!((small.visual_rotation() - (vs * 0.1 * RAD2DEG).rem_euclid(360.0)).abs() < 1e-3);
        assert!((large.visual_rotation() - (vl * 0.1 * RAD2DEG).rem_euclid(360.0)).abs() < 1e-3);
    }

    #[test]
    fn test_status_sexp() {
        let mut w = WheelController::new(Hand::Left, WheelConfig::default());
        assert!(w.status_sexp().starts_with("(:side left :state released :angular-velocity"));
        w.grab_begin(3, Hand::Left, rim_point(0.0));
        assert!(w.status_sexp().contains(":state grabbed :interactor 3 :hand left"));
    }
}
