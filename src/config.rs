//! Rig configuration: built-in defaults, an optional plist file, and
//! runtime updates over IPC.
//!
//! A config file is a single s-expression plist using the same keys the
//! `rig-config` message accepts:
//!
//! ```text
//! (:max-speed 2.5 :rotation-damping 4.0 :detect-bimanual nil
//!  :center-of-mass-offset (0 -0.4 0.05))
//! ```

use std::path::Path;

use anyhow::Context;
use lexpr::Value;
use tracing::{debug, info, warn};

use crate::plist::{flag, get_value, get_vec3, vec3_sexp};
use crate::rig::comfort::ComfortConfig;
use crate::rig::math::Vec3;
use crate::rig::rotation::DetectorConfig;
use crate::rig::vehicle::VehicleConfig;
use crate::rig::wheel::WheelConfig;

/// Every tunable of the rig plus loop rates.
#[derive(Debug, Clone)]
pub struct RigConfig {
    pub detector: DetectorConfig,
    pub wheel: WheelConfig,
    pub vehicle: VehicleConfig,
    pub comfort: ComfortConfig,
    /// Update pass rate (Hz).
    pub frame_hz: f64,
    /// Physics step rate (Hz).
    pub physics_hz: f64,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            wheel: WheelConfig::default(),
            vehicle: VehicleConfig::default(),
            comfort: ComfortConfig::default(),
            frame_hz: 90.0,
            physics_hz: 50.0,
        }
    }
}

impl RigConfig {
    /// Defaults overlaid with the plist in `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let value = lexpr::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        let mut config = Self::default();
        let applied = config.apply_plist(&value);
        info!(path = %path.display(), keys = applied, "config loaded");
        Ok(config)
    }

    /// Overlay every recognised key present in `value`.  Unknown keys are
    /// ignored; malformed values are skipped with a warning.  Returns the
    /// number of keys applied.
    pub fn apply_plist(&mut self, value: &Value) -> usize {
        let mut n = 0;
        let mut f = |key: &str, target: &mut f32| n += read_f32(value, key, target) as usize;

        let d = &mut self.detector;
        f("detection-accuracy", &mut d.detection_accuracy);
        f("min-rotation-threshold", &mut d.min_rotation_threshold);
        f("noise-filter-strength", &mut d.noise_filter_strength);
        f("smoothing-filter-strength", &mut d.smoothing_filter_strength);

        let w = &mut self.wheel;
        f("wheel-radius", &mut w.radius);
        f("rotation-sensitivity", &mut w.sensitivity);
        f("rotation-damping", &mut w.damping);
        f("min-rotation-angle", &mut w.min_rotation_angle);
        f("grab-lag-rate", &mut w.grab_lag_rate);

        let v = &mut self.vehicle;
        f("max-speed", &mut v.max_speed);
        f("acceleration", &mut v.acceleration);
        f("deceleration", &mut v.deceleration);
        f("turn-sensitivity", &mut v.turn_sensitivity);
        f("min-hand-movement-distance", &mut v.min_hand_movement_distance);
        f("max-hand-movement-interval", &mut v.max_hand_movement_interval);
        f("angular-damping", &mut v.angular_damping);
        f("turn-epsilon", &mut v.turn_epsilon);

        let c = &mut self.comfort;
        f("fade-intensity", &mut c.fade_intensity);
        f("vignette-intensity", &mut c.vignette_intensity);
        f("boundary-warning-distance", &mut c.boundary_warning_distance);
        f("play-area-radius", &mut c.play_area_radius);

        let mut secs = |key: &str, target: &mut f64| n += read_f64(value, key, target) as usize;
        secs("continuous-rotation-window", &mut self.detector.continuous_rotation_window);
        secs("rotation-time-window", &mut self.wheel.rotation_time_window);
        secs("frame-hz", &mut self.frame_hz);
        secs("physics-hz", &mut self.physics_hz);

        let mut b = |key: &str, target: &mut bool| {
            if let Some(v) = get_value(value, key) {
                *target = !is_nil(v);
                n += 1;
            }
        };
        b("detect-bimanual", &mut self.detector.detect_bimanual);
        b("fade-on-movement", &mut self.comfort.use_fade_on_movement);
        b("vignette-on-turn", &mut self.comfort.use_vignette_on_turn);
        b("respect-play-area", &mut self.comfort.respect_play_area);
        b("boundary-warnings", &mut self.comfort.show_boundary_warnings);

        let mut v3 = |key: &str, target: &mut Vec3| n += read_vec3(value, key, target) as usize;
        v3("center-of-mass-offset", &mut self.vehicle.center_of_mass_offset);
        v3("seat-offset", &mut self.vehicle.seat_offset);
        v3("left-wheel-offset", &mut self.vehicle.left_wheel_offset);
        v3("right-wheel-offset", &mut self.vehicle.right_wheel_offset);
        v3("play-area-center", &mut self.comfort.play_area_center);

        if let Some(raw) = get_value(value, "history-capacity") {
            match raw.as_u64() {
                Some(cap) if cap > 0 => {
                    self.detector.history_capacity = cap as usize;
                    n += 1;
                }
                _ => warn!(key = "history-capacity", value = %raw, "ignoring non-positive integer"),
            }
        }

        self.sanitize();
        debug!(keys = n, "config plist applied");
        n
    }

    /// Clamp every tunable into its supported range.
    fn sanitize(&mut self) {
        let d = &mut self.detector;
        clamp("detection-accuracy", &mut d.detection_accuracy, 0.1, 2.0);
        clamp("min-rotation-threshold", &mut d.min_rotation_threshold, 1.0, 30.0);
        clamp("noise-filter-strength", &mut d.noise_filter_strength, 0.1, 10.0);
        clamp("smoothing-filter-strength", &mut d.smoothing_filter_strength, 0.1, 10.0);
        clamp_secs("continuous-rotation-window", &mut d.continuous_rotation_window, 0.1, 1.0);

        let w = &mut self.wheel;
        clamp("wheel-radius", &mut w.radius, 0.1, 1.0);
        clamp("rotation-sensitivity", &mut w.sensitivity, 0.1, 5.0);
        clamp("rotation-damping", &mut w.damping, 0.1, 10.0);
        clamp("min-rotation-angle", &mut w.min_rotation_angle, 1.0, 45.0);
        clamp("grab-lag-rate", &mut w.grab_lag_rate, 0.0, f32::MAX);
        clamp_secs("rotation-time-window", &mut w.rotation_time_window, 0.1, 1.0);

        let v = &mut self.vehicle;
        v.max_speed = v.max_speed.abs();
        clamp("max-speed", &mut v.max_speed, 0.1, 10.0);
        clamp("acceleration", &mut v.acceleration, 0.1, 20.0);
        clamp("deceleration", &mut v.deceleration, 0.1, 10.0);
        clamp("turn-sensitivity", &mut v.turn_sensitivity, 0.1, 5.0);
        clamp("min-hand-movement-distance", &mut v.min_hand_movement_distance, 0.01, 0.5);
        clamp("max-hand-movement-interval", &mut v.max_hand_movement_interval, 0.1, 2.0);
        clamp("angular-damping", &mut v.angular_damping, 0.0, f32::MAX);
        clamp("turn-epsilon", &mut v.turn_epsilon, 0.0, f32::MAX);

        let c = &mut self.comfort;
        clamp("fade-intensity", &mut c.fade_intensity, 0.0, 1.0);
        clamp("vignette-intensity", &mut c.vignette_intensity, 0.0, 1.0);
        clamp("boundary-warning-distance", &mut c.boundary_warning_distance, 0.1, 2.0);
        clamp("play-area-radius", &mut c.play_area_radius, 0.1, f32::MAX);

        if !(self.frame_hz > 0.0) {
            self.frame_hz = 90.0;
        }
        if !(self.physics_hz > 0.0) {
            self.physics_hz = 50.0;
        }
    }

    /// Full config as a plist that `apply_plist` accepts back.
    pub fn to_sexp(&self) -> String {
        let d = &self.detector;
        let w = &self.wheel;
        let v = &self.vehicle;
        let c = &self.comfort;
        format!(
            concat!(
                "(:detection-accuracy {} :min-rotation-threshold {} :continuous-rotation-window {} ",
                ":detect-bimanual {} :noise-filter-strength {} :smoothing-filter-strength {} :history-capacity {} ",
                ":wheel-radius {} :rotation-sensitivity {} :rotation-damping {} :min-rotation-angle {} ",
                ":rotation-time-window {} :grab-lag-rate {} ",
                ":max-speed {} :acceleration {} :deceleration {} :turn-sensitivity {} ",
                ":min-hand-movement-distance {} :max-hand-movement-interval {} :center-of-mass-offset {} ",
                ":angular-damping {} :turn-epsilon {} :seat-offset {} :left-wheel-offset {} :right-wheel-offset {} ",
                ":fade-on-movement {} :fade-intensity {} :vignette-on-turn {} :vignette-intensity {} ",
                ":respect-play-area {} :boundary-warnings {} :boundary-warning-distance {} ",
                ":play-area-center {} :play-area-radius {} :frame-hz {} :physics-hz {})"
            ),
            d.detection_accuracy, d.min_rotation_threshold, d.continuous_rotation_window,
            flag(d.detect_bimanual), d.noise_filter_strength, d.smoothing_filter_strength, d.history_capacity,
            w.radius, w.sensitivity, w.damping, w.min_rotation_angle,
            w.rotation_time_window, w.grab_lag_rate,
            v.max_speed, v.acceleration, v.deceleration, v.turn_sensitivity,
            v.min_hand_movement_distance, v.max_hand_movement_interval, vec3_sexp(&v.center_of_mass_offset),
            v.angular_damping, v.turn_epsilon, vec3_sexp(&v.seat_offset),
            vec3_sexp(&v.left_wheel_offset), vec3_sexp(&v.right_wheel_offset),
            flag(c.use_fade_on_movement), c.fade_intensity, flag(c.use_vignette_on_turn), c.vignette_intensity,
            flag(c.respect_play_area), flag(c.show_boundary_warnings), c.boundary_warning_distance,
            vec3_sexp(&c.play_area_center), c.play_area_radius, self.frame_hz, self.physics_hz,
        )
    }
}

fn clamp(key: &str, target: &mut f32, min: f32, max: f32) {
    let clamped = target.clamp(min, max);
    if clamped != *target {
        warn!(key, value = *target, clamped, "config value out of range");
        *target = clamped;
    }
}

fn clamp_secs(key: &str, target: &mut f64, min: f64, max: f64) {
    let clamped = target.clamp(min, max);
    if clamped != *target {
        warn!(key, value = *target, clamped, "config value out of range");
        *target = clamped;
    }
}

fn is_nil(v: &Value) -> bool {
    match v {
        Value::Null | Value::Nil | Value::Bool(false) => true,
        Value::Symbol(s) => s.as_ref() == "nil",
        _ => false,
    }
}

fn read_f64(value: &Value, key: &str, target: &mut f64) -> bool {
    let Some(raw) = get_value(value, key) else {
        return false;
    };
    match raw.as_f64() {
        Some(x) if x.is_finite() => {
            *target = x;
            true
        }
        _ => {
            warn!(key, value = %raw, "ignoring non-numeric config value");
            false
        }
    }
}

fn read_f32(value: &Value, key: &str, target: &mut f32) -> bool {
    let mut x = f64::from(*target);
    let applied = read_f64(value, key, &mut x);
    if applied {
        *target = x as f32;
    }
    applied
}

fn read_vec3(value: &Value, key: &str, target: &mut Vec3) -> bool {
    if get_value(value, key).is_none() {
        return false;
    }
    match get_vec3(value, key) {
        Some(v) => {
            *target = v;
            true
        }
        None => {
            warn!(key, "ignoring malformed vector, expected (x y z)");
            false
        }
    }
}
