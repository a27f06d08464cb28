//! Property-list access for s-expressions.
//!
//! IPC messages and config files share one shape: a flat plist such as
//! `(:type :grab-move :wheel :left :position (0.1 0.9 0.3))`.  Keys may be
//! read back as lexpr keywords or as `:`-prefixed symbols depending on the
//! parser options, so both are accepted.

use lexpr::Value;

use nalgebra::Quaternion;

use crate::rig::math::{Quat, Vec3};

/// Value following `:key` in a plist.
pub fn get_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let prefixed = format!(":{key}");
    let mut current = value;
    while let Value::Cons(pair) = current {
        let is_key = match pair.car() {
            Value::Keyword(k) => k.as_ref() == key,
            Value::Symbol(s) => s.as_ref() == prefixed,
            _ => false,
        };
        if is_key {
            return match pair.cdr() {
                Value::Cons(next) => Some(next.car()),
                _ => None,
            };
        }
        current = pair.cdr();
    }
    None
}

/// Value following `:key` rendered as a plain string.  Keywords lose their
/// colon; booleans and the empty list read as `t` / `nil`.
pub fn get_keyword(value: &Value, key: &str) -> Option<String> {
    get_value(value, key).map(atom_string)
}

fn atom_string(val: &Value) -> String {
    match val {
        Value::Keyword(v) => v.to_string(),
        Value::Symbol(v) => {
            let s = v.to_string();
            s.strip_prefix(':').unwrap_or(&s).to_string()
        }
        Value::String(v) => v.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => flag(*b).to_string(),
        Value::Null | Value::Nil => "nil".to_string(),
        other => other.to_string(),
    }
}

pub fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

pub fn get_string(value: &Value, key: &str) -> Option<String> {
    get_keyword(value, key)
}

/// `nil` is false, anything else true.
pub fn get_bool(value: &Value, key: &str) -> Option<bool> {
    get_keyword(value, key).map(|s| s != "nil")
}

/// Finite float.  NaN and infinities read as absent.
pub fn get_float(value: &Value, key: &str) -> Option<f64> {
    get_keyword(value, key)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| f.is_finite())
}

/// A `(x y z)` list of finite numbers.
pub fn get_vec3(value: &Value, key: &str) -> Option<Vec3> {
    let list = get_value(value, key)?;
    let nums: Vec<f32> = flatten_list(list)
        .into_iter()
        .map(|v| v.as_f64())
        .collect::<Option<Vec<f64>>>()?
        .into_iter()
        .map(|f| f as f32)
        .collect();
    match nums.as_slice() {
        [x, y, z] if x.is_finite() && y.is_finite() && z.is_finite() => Some(Vec3::new(*x, *y, *z)),
        _ => None,
    }
}

/// An `(x y z w)` quaternion, normalized.  Zero-length reads as absent.
pub fn get_quat(value: &Value, key: &str) -> Option<Quat> {
    let list = get_value(value, key)?;
    let nums = flatten_list(list)
        .into_iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<f32>>>()?;
    match nums.as_slice() {
        [x, y, z, w] => {
            let q = Quaternion::new(*w, *x, *y, *z);
            let norm = q.norm();
            if norm.is_finite() && norm > 1e-6 {
                Some(Quat::from_quaternion(q))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Flatten a possibly nested list into its leaf values.
pub fn flatten_list(value: &Value) -> Vec<&Value> {
    let mut result = Vec::new();
    fn walk<'a>(v: &'a Value, out: &mut Vec<&'a Value>) {
        match v {
            Value::Cons(pair) => {
                walk(pair.car(), out);
                walk(pair.cdr(), out);
            }
            Value::Null => {}
            other => out.push(other),
        }
    }
    walk(value, &mut result);
    result
}

/// Escape a string for embedding in a quoted s-expression string.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// `t` / `nil`.
pub fn flag(b: bool) -> &'static str {
    if b {
        "t"
    } else {
        "nil"
    }
}

/// `(x y z)` with millimeter precision.
pub fn vec3_sexp(v: &Vec3) -> String {
    format!("({:.3} {:.3} {:.3})", v.x, v.y, v.z)
}
