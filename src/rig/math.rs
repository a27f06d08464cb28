//! Vector helpers shared by the rotation estimator, wheels, and vehicle.
//!
//! Tracking space is Y-up with +Z forward and +X to the right.
//! Angles crossing module boundaries are degrees unless a name says `_rad`.

use nalgebra::{UnitQuaternion, Vector3};

/// 3D vector in tracking space (meters).
pub type Vec3 = Vector3<f32>;

/// Orientation in tracking space.
pub type Quat = UnitQuaternion<f32>;

pub const DEG2RAD: f32 = std::f32::consts::PI / 180.0;
pub const RAD2DEG: f32 = 180.0 / std::f32::consts::PI;

/// Projected vectors shorter than this (meters) carry no usable direction.
pub const MIN_PROJECTED_LEN: f32 = 0.01;

/// World up axis.
pub fn up() -> Vec3 {
    Vector3::y()
}

/// World forward axis.
pub fn forward() -> Vec3 {
    Vector3::z()
}

/// Remove the component of `v` along `normal`.
///
/// A zero-length normal leaves `v` unchanged.
pub fn project_on_plane(v: &Vec3, normal: &Vec3) -> Vec3 {
    let len_sq = normal.norm_squared();
    if len_sq < f32::EPSILON {
        return *v;
    }
    v - normal * (v.dot(normal) / len_sq)
}

/// Signed angle in degrees rotating `from` onto `to` about `axis`.
///
/// Positive when `from × to` points along `axis`. Returns 0 for
/// degenerate inputs (zero-length vectors or axis).
pub fn signed_angle(from: &Vec3, to: &Vec3, axis: &Vec3) -> f32 {
    let axis_len = axis.norm();
    if axis_len < f32::EPSILON || from.norm() < f32::EPSILON || to.norm() < f32::EPSILON {
        return 0.0;
    }
    let n = axis / axis_len;
    let sin = from.cross(to).dot(&n);
    let cos = from.dot(to);
    sin.atan2(cos) * RAD2DEG
}

/// Clamp to [0, 1]. NaN maps to 0.
pub fn clamp01(v: f32) -> f32 {
    if v.is_nan() {
        return 0.0;
    }
    v.clamp(0.0, 1.0)
}

/// Linear interpolation with `t` clamped to [0, 1].
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * clamp01(t)
}

/// Step `current` toward `target` by at most `max_delta` (linear, never overshoots).
pub fn move_towards(current: &Vec3, target: &Vec3, max_delta: f32) -> Vec3 {
    let delta = target - current;
    let dist = delta.norm();
    if dist <= max_delta || dist < f32::EPSILON {
        return *target;
    }
    current + delta / dist * max_delta
}

/// Heading of `rotation` in degrees about the up axis (0 = +Z, 90 = +X).
pub fn yaw_degrees(rotation: &Quat) -> f32 {
    let f = rotation * forward();
    f.x.atan2(f.z) * RAD2DEG
}

/// Pure rotation about the up axis.
pub fn yaw_rotation(degrees: f32) -> Quat {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), degrees * DEG2RAD)
}

/// Whether every component is finite.
pub fn is_finite(v: &Vec3) -> bool {
    v.iter().all(|c| c.is_finite())
}
