//! Rider comfort and play-area safety.
//!
//! Tracks whether the chair is in use, derives fade and vignette amounts
//! from motion, and keeps the viewer rig inside a circular play area.

use tracing::{debug, warn};

use super::math::{clamp01, forward, Quat, Vec3};
use super::vehicle::VehicleIntegrator;

/// Chair translation per tick (meters) above which it counts as active.
pub const ACTIVE_MOVE_M: f32 = 0.01;
/// Chair rotation per tick (degrees) above which it counts as active.
pub const ACTIVE_TURN_DEG: f32 = 1.0;
/// Wheel speed (rad/s) above which the chair counts as active.
pub const ACTIVE_WHEEL_SPEED: f32 = 0.1;
/// Speed (m/s) at which the fade saturates.
pub const FADE_FULL_SPEED: f32 = 5.0;
/// Wheel speed difference (rad/s) at which the vignette saturates.
pub const VIGNETTE_FULL_TURN: f32 = 3.0;

// ── Config ─────────────────────────────────────────────────

/// Comfort and boundary settings.
#[derive(Debug, Clone)]
pub struct ComfortConfig {
    pub use_fade_on_movement: bool,
    pub fade_intensity: f32,
    pub use_vignette_on_turn: bool,
    pub vignette_intensity: f32,
    /// Enforce the play area at all.
    pub respect_play_area: bool,
    /// Emit boundary warnings (and edge resets).
    pub show_boundary_warnings: bool,
    /// Distance from the edge (meters) at which warnings start.
    pub boundary_warning_distance: f32,
    /// Distance from the edge (meters) at which an outward-facing chair is reset.
    pub edge_reset_distance: f32,
    pub play_area_center: Vec3,
    pub play_area_radius: f32,
}

impl Default for ComfortConfig {
    fn default() -> Self {
        Self {
            use_fade_on_movement: false,
            fade_intensity: 0.3,
            use_vignette_on_turn: true,
            vignette_intensity: 0.5,
            respect_play_area: true,
            show_boundary_warnings: true,
            boundary_warning_distance: 0.5,
            edge_reset_distance: 0.1,
            play_area_center: Vec3::zeros(),
            play_area_radius: 2.0,
        }
    }
}

// ── Events ─────────────────────────────────────────────────

/// Events emitted by the comfort monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum ComfortEvent {
    /// The chair switched between in use and idle.
    ActiveChanged(bool),
    /// The viewer rig entered the warning band near the edge.
    BoundaryWarning(Vec3),
    /// The chair faced out of the play area at its edge and was reset.
    BoundaryReset(Vec3),
}

impl ComfortEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveChanged(_) => "wheelchair-active",
            Self::BoundaryWarning(_) => "boundary-warning",
            Self::BoundaryReset(_) => "boundary-reset",
        }
    }
}

// ── Pure helpers ───────────────────────────────────────────

/// Overlay amounts in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComfortAmounts {
    pub fade: f32,
    pub vignette: f32,
}

/// Fade from chair speed, vignette from the wheel speed difference.
pub fn comfort_amounts(config: &ComfortConfig, velocity: &Vec3, left: f32, right: f32) -> ComfortAmounts {
    let fade = if config.use_fade_on_movement {
        clamp01(velocity.norm() / FADE_FULL_SPEED) * config.fade_intensity
    } else {
        0.0
    };
    let vignette = if config.use_vignette_on_turn {
        clamp01((right - left).abs() / VIGNETTE_FULL_TURN) * config.vignette_intensity
    } else {
        0.0
    };
    ComfortAmounts {
        fade: clamp01(fade),
        vignette: clamp01(vignette),
    }
}

/// Where the viewer rig stands relative to the play area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryCheck {
    Inside,
    /// Within the warning band.
    Warning { distance_from_edge: f32 },
    /// At the edge and facing outward.
    ResetRequired { distance_from_edge: f32 },
}

/// Classify `position` against the play area.  Distances are measured on
/// the ground plane.
pub fn check_boundary(config: &ComfortConfig, position: &Vec3, chair_forward: &Vec3) -> BoundaryCheck {
    let offset = config.play_area_center - position;
    let to_center = Vec3::new(offset.x, 0.0, offset.z);
    let distance_from_edge = config.play_area_radius - to_center.norm();

    if !(distance_from_edge < config.boundary_warning_distance) {
        return BoundaryCheck::Inside;
    }
    if distance_from_edge < config.edge_reset_distance {
        let facing = match to_center.try_normalize(f32::EPSILON) {
            Some(dir) => chair_forward.dot(&dir),
            None => 0.0,
        };
        if facing < 0.0 {
            return BoundaryCheck::ResetRequired { distance_from_edge };
        }
    }
    BoundaryCheck::Warning { distance_from_edge }
}

// ── Activity ───────────────────────────────────────────────

/// Detects whether the chair is in use.
#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    active: bool,
    last_position: Vec3,
    last_rotation: Quat,
}

impl ActivityMonitor {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            active: false,
            last_position: position,
            last_rotation: rotation,
        }
    }

    /// Update from the chair pose and wheel speeds.  Returns the new state
    /// when it changed.
    pub fn update(&mut self, position: &Vec3, rotation: &Quat, left: f32, right: f32) -> Option<bool> {
        let moved = (position - self.last_position).norm();
        let turned = self.last_rotation.angle_to(rotation).to_degrees();
        self.last_position = *position;
        self.last_rotation = *rotation;

        let active = moved > ACTIVE_MOVE_M
            || turned > ACTIVE_TURN_DEG
            || left.abs() > ACTIVE_WHEEL_SPEED
            || right.abs() > ACTIVE_WHEEL_SPEED;
        if active == self.active {
            return None;
        }
        self.active = active;
        Some(active)
    }

    /// Force the flag.
    pub fn set(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

// ── Monitor ────────────────────────────────────────────────

/// Per-tick comfort and safety bookkeeping for one chair.
#[derive(Debug, Clone)]
pub struct ComfortMonitor {
    /// Configuration.
    pub config: ComfortConfig,
    activity: ActivityMonitor,
    amounts: ComfortAmounts,
    in_warning_band: bool,
}

impl ComfortMonitor {
    pub fn new(config: ComfortConfig, vehicle: &VehicleIntegrator) -> Self {
        Self {
            config,
            activity: ActivityMonitor::new(vehicle.body.position, vehicle.body.rotation),
            amounts: ComfortAmounts::default(),
            in_warning_band: false,
        }
    }

    /// Run after the vehicle has moved.  Resets the vehicle itself when it
    /// faces out of the play area at the edge.
    pub fn update(&mut self, vehicle: &mut VehicleIntegrator, events: &mut Vec<ComfortEvent>) {
        if let Some(active) = self.activity.update(
            &vehicle.body.position,
            &vehicle.body.rotation,
            vehicle.left_speed(),
            vehicle.right_speed(),
        ) {
            debug!(active, "wheelchair activity changed");
            events.push(ComfortEvent::ActiveChanged(active));
        }

        self.amounts = comfort_amounts(
            &self.config,
            &vehicle.current_velocity(),
            vehicle.left_speed(),
            vehicle.right_speed(),
        );

        if !(self.config.respect_play_area && self.config.show_boundary_warnings) {
            self.in_warning_band = false;
            return;
        }

        let position = vehicle.viewer.position;
        let chair_forward = vehicle.body.rotation * forward();
        match check_boundary(&self.config, &position, &chair_forward) {
            BoundaryCheck::Inside => self.in_warning_band = false,
            BoundaryCheck::Warning { distance_from_edge } => {
                if !self.in_warning_band {
                    debug!(distance_from_edge, "approaching play area boundary");
                    events.push(ComfortEvent::BoundaryWarning(position));
                }
                self.in_warning_band = true;
            }
            BoundaryCheck::ResetRequired { distance_from_edge } => {
                if !self.in_warning_band {
                    events.push(ComfortEvent::BoundaryWarning(position));
                }
                self.in_warning_band = true;
                warn!(distance_from_edge, "facing out of play area, resetting wheelchair");
                vehicle.reset();
                events.push(ComfortEvent::BoundaryReset(position));
            }
        }
    }

    /// Force the active flag and report it.
    pub fn set_wheelchair_mode(&mut self, active: bool, events: &mut Vec<ComfortEvent>) {
        self.activity.set(active);
        debug!(active, "wheelchair mode set");
        events.push(ComfortEvent::ActiveChanged(active));
    }

    pub fn is_active(&self) -> bool {
        self.activity.is_active()
    }

    pub fn amounts(&self) -> ComfortAmounts {
        self.amounts
    }

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:active {} :fade {:.3} :vignette {:.3} :near-boundary {})",
            if self.is_active() { "t" } else { "nil" },
            self.amounts.fade,
            self.amounts.vignette,
            if self.in_warning_band { "t" } else { "nil" },
        )
    }

    /// Generate s-expression for IPC config.
    pub fn config_sexp(&self) -> String {
        let c = &self.config;
        let flag = |b: bool| if b { "t" } else { "nil" };
        format!(
            "(:fade-on-movement {} :fade-intensity {:.2} :vignette-on-turn {} :vignette-intensity {:.2} :respect-play-area {} :boundary-warnings {} :boundary-warning-distance {:.2} :play-area-radius {:.2})",
            flag(c.use_fade_on_movement),
            c.fade_intensity,
            flag(c.use_vignette_on_turn),
            c.vignette_intensity,
            flag(c.respect_play_area),
            flag(c.show_boundary_warnings),
            c.boundary_warning_distance,
            c.play_area_radius,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::math::yaw_rotation;

    #[test]
    fn test_fade_scales_with_speed() {
        let config = ComfortConfig {
            use_fade_on_movement: true,
            ..ComfortConfig::default()
        };
        let a = comfort_amounts(&config, &Vec3::new(0.0, 0.0, 2.5), 0.0, 0.0);
        assert!((a.fade - 0.15).abs() < 1e-5);
        let a = comfort_amounts(&config, &Vec3::new(0.0, 0.0, 50.0), 0.0, 0.0);
        assert!((a.fade - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_fade_disabled_by_default() {
        let a = comfort_amounts(&ComfortConfig::default(), &Vec3::new(0.0, 0.0, 3.0), 0.0, 0.0);
        assert_eq!(a.fade, 0.0);
    }

    #[test]
    fn test_vignette_from_turn() {
        let config = ComfortConfig::default();
        let a = comfort_amounts(&config, &Vec3::zeros(), 1.0, 2.5);
        assert!((a.vignette - 0.25).abs() < 1e-5);
        let a = comfort_amounts(&config, &Vec3::zeros(), -4.0, 4.0);
        assert!((a.vignette - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_boundary_regions() {
        let config = ComfortConfig::default();
        let fwd = forward();
        assert_eq!(check_boundary(&config, &Vec3::zeros(), &fwd), BoundaryCheck::Inside);
        assert!(matches!(
            check_boundary(&config, &Vec3::new(1.7, 1.2, 0.0), &fwd),
            BoundaryCheck::Warning { .. }
        ));
        // At the edge facing outward (+X while the center is at -X)
        assert!(matches!(
            check_boundary(&config, &Vec3::new(1.95, 0.0, 0.0), &Vec3::x()),
            BoundaryCheck::ResetRequired { .. }
        ));
        // At the edge facing back in
        assert!(matches!(
            check_boundary(&config, &Vec3::new(1.95, 0.0, 0.0), &-Vec3::x()),
            BoundaryCheck::Warning { .. }
        ));
    }

    #[test]
    fn test_activity_transitions() {
        let mut m = ActivityMonitor::new(Vec3::zeros(), Quat::identity());
        assert_eq!(m.update(&Vec3::zeros(), &Quat::identity(), 0.0, 0.0), None);
        assert_eq!(m.update(&Vec3::new(0.0, 0.0, 0.05), &Quat::identity(), 0.0, 0.0), Some(true));
        assert_eq!(m.update(&Vec3::new(0.0, 0.0, 0.05), &Quat::identity(), 0.5, 0.0), None);
        assert_eq!(m.update(&Vec3::new(0.0, 0.0, 0.05), &Quat::identity(), 0.0, 0.0), Some(false));
        assert_eq!(m.update(&Vec3::new(0.0, 0.0, 0.05), &yaw_rotation(2.0), 0.0, 0.0), Some(true));
        assert!(m.is_active());
    }

    #[test]
    fn test_monitor_emits_activity_once() {
        let mut vehicle = VehicleIntegrator::default();
        let mut monitor = ComfortMonitor::new(ComfortConfig::default(), &vehicle);
        let mut events = Vec::new();
        vehicle.body.position.z = 0.5;
        monitor.update(&mut vehicle, &mut events);
        monitor.update(&mut vehicle, &mut events);
        assert_eq!(events, vec![ComfortEvent::ActiveChanged(true), ComfortEvent::ActiveChanged(false)]);
    }

    #[test]
    fn test_monitor_warns_once_and_resets_at_edge() {
        let mut vehicle = VehicleIntegrator::default();
        let mut monitor = ComfortMonitor::new(ComfortConfig::default(), &vehicle);
        let mut events = Vec::new();

        vehicle.viewer.position = Vec3::new(0.0, 1.0, 1.7);
        monitor.update(&mut vehicle, &mut events);
        monitor.update(&mut vehicle, &mut events);
        let warnings = events.iter().filter(|e| matches!(e, ComfortEvent::BoundaryWarning(_))).count();
        assert_eq!(warnings, 1);

        // Facing +Z at z = 1.95: outward
        vehicle.viewer.position = Vec3::new(0.0, 1.0, 1.95);
        vehicle.body.linear_velocity = Vec3::new(0.0, 0.0, 1.0);
        monitor.update(&mut vehicle, &mut events);
        assert!(events.iter().any(|e| matches!(e, ComfortEvent::BoundaryReset(_))));
        assert_eq!(vehicle.body.linear_velocity, Vec3::zeros());
    }

    #[test]
    fn test_boundary_disabled() {
        let mut vehicle = VehicleIntegrator::default();
        let config = ComfortConfig {
            respect_play_area: false,
            ..ComfortConfig::default()
        };
        let mut monitor = ComfortMonitor::new(config, &vehicle);
        let mut events = Vec::new();
        vehicle.viewer.position = Vec3::new(0.0, 1.0, 1.99);
        monitor.update(&mut vehicle, &mut events);
        assert!(events.is_empty());
    }

    #[test]
    fn test_set_wheelchair_mode() {
        let vehicle = VehicleIntegrator::default();
        let mut monitor = ComfortMonitor::new(ComfortConfig::default(), &vehicle);
        let mut events = Vec::new();
        monitor.set_wheelchair_mode(true, &mut events);
        assert!(monitor.is_active());
        assert_eq!(events, vec![ComfortEvent::ActiveChanged(true)]);
        assert!(monitor.status_sexp().starts_with("(:active t"));
    }
}
