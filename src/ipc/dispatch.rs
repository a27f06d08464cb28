//! IPC message dispatch — parse s-expressions and route to handlers.

use lexpr::Value;
use tracing::{debug, info, warn};

use crate::plist::{
    escape_string, flag, get_bool, get_float, get_int, get_keyword, get_quat, get_string,
    get_vec3, vec3_sexp,
};
use crate::rig::comfort::ComfortEvent;
use crate::rig::math::Quat;
use crate::rig::session::{FeedbackGroup, Phase, Task};
use crate::rig::{Hand, HandPose, RigEvent, RotationEvent};
use crate::state::RigState;

/// Parse an s-expression message and dispatch to the appropriate handler.
/// Returns an optional response string (s-expression).
pub fn handle_message(state: &mut RigState, client_id: u64, raw: &str) -> Option<String> {
    let value = match lexpr::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(client_id, "malformed s-expression: {}", e);
            return Some(error_response(0, &format!("malformed s-expression: {e}")));
        }
    };

    let msg_type = get_keyword(&value, "type");
    let msg_id = get_int(&value, "id").unwrap_or(0);

    let is_authenticated = state
        .ipc_server
        .clients
        .get(&client_id)
        .map(|c| c.authenticated)
        .unwrap_or(false);

    match msg_type.as_deref() {
        Some("hello") => handle_hello(state, client_id, msg_id, &value),
        _ if !is_authenticated => Some(error_response(msg_id, "hello handshake required")),
        Some("ping") => handle_ping(state, msg_id, &value),
        Some("hand-pose") => handle_hand_pose(state, client_id, msg_id, &value),
        Some("hand-lost") => handle_hand_lost(state, msg_id, &value),
        Some("grab-begin") => handle_grab_begin(state, msg_id, &value),
        Some("grab-move") => handle_grab_move(state, msg_id, &value),
        Some("grab-end") => handle_grab_end(state, msg_id, &value),
        Some("rig-status") => handle_rig_status(state, msg_id),
        Some("rig-config") => handle_rig_config(state, msg_id, &value),
        Some("rotation-status") => handle_rotation_status(state, msg_id),
        Some("vehicle-status") => handle_vehicle_status(state, msg_id),
        Some("rig-reset") => handle_rig_reset(state, msg_id),
        Some("rig-reset-to-center") => handle_rig_reset_to_center(state, msg_id),
        Some("wheelchair-mode") => handle_wheelchair_mode(state, msg_id, &value),
        Some("frame-timing") => handle_frame_timing(state, msg_id),
        Some("session-set") => handle_session_set(state, msg_id, &value),
        Some("session-start") => handle_session_start(state, msg_id),
        Some("session-end") => handle_session_end(state, msg_id),
        Some("session-status") => handle_session_status(state, msg_id),
        Some(other) => {
            debug!(client_id, msg_type = other, "unknown message type");
            Some(error_response(msg_id, &format!("unknown message type: {other}")))
        }
        None => Some(error_response(msg_id, "missing :type field")),
    }
}

// ── Handshake ──────────────────────────────────────────────

fn handle_hello(state: &mut RigState, client_id: u64, msg_id: i64, value: &Value) -> Option<String> {
    let version = get_int(value, "version").unwrap_or(0);
    if version != 1 {
        return Some(error_response(
            msg_id,
            &format!("unsupported protocol version: {version}"),
        ));
    }

    // Only the rig's own user may drive it.
    if let Some(client) = state.ipc_server.clients.get(&client_id) {
        if let Some(peer_uid) = client.peer_uid {
            let our_uid = unsafe { libc::getuid() };
            if peer_uid != our_uid {
                warn!(client_id, peer_uid, our_uid, "rejecting client: UID mismatch");
                return Some(error_response(msg_id, "authentication failed: UID mismatch"));
            }
        }
    }

    let client_name = get_string(value, "client").unwrap_or_default();
    debug!(client_id, client_name, "hello handshake (authenticated)");

    let mut peer_pid = None;
    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
        client.authenticated = true;
        client.name = Some(client_name);
        peer_pid = client.peer_pid;
    }

    let pid_field = peer_pid
        .map(|p| format!(" :peer-pid {}", p))
        .unwrap_or_default();
    Some(format!(
        "(:type :hello :id {} :version 1 :server \"wheelchair-rig\" :features (:bimanual {} :session t){})",
        msg_id,
        flag(state.config.detector.detect_bimanual),
        pid_field
    ))
}

fn handle_ping(state: &mut RigState, msg_id: i64, value: &Value) -> Option<String> {
    let client_ts = get_int(value, "timestamp").unwrap_or(0);
    let server_ts = state.unix_millis();
    Some(format!(
        "(:type :response :id {} :status :ok :client-timestamp {} :server-timestamp {} :rig-time {:.6})",
        msg_id,
        client_ts,
        server_ts,
        state.now_secs()
    ))
}

// ── Hand input ─────────────────────────────────────────────

fn parse_hand(value: &Value, key: &str) -> Result<Hand, String> {
    match get_keyword(value, key) {
        Some(s) => Hand::parse(&s).ok_or_else(|| format!("invalid :{key}: {s}")),
        None => Err(format!("missing :{key}")),
    }
}

/// Latch a tracked pose for the next update pass.  A client `:timestamp`
/// is mapped onto the rig clock; without one the pose is stamped now.
fn handle_hand_pose(state: &mut RigState, client_id: u64, msg_id: i64, value: &Value) -> Option<String> {
    let hand = match parse_hand(value, "hand") {
        Ok(h) => h,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    let Some(position) = get_vec3(value, "position") else {
        return Some(error_response(msg_id, "missing or invalid :position"));
    };
    let orientation = get_quat(value, "orientation").unwrap_or_else(Quat::identity);
    let now = state.now_secs();
    let timestamp = match get_float(value, "timestamp") {
        Some(ts) if ts.is_finite() => state
            .ipc_server
            .clients
            .get_mut(&client_id)
            .map_or(now, |client| client.clock.map(ts, now)),
        _ => now,
    };

    state
        .pending
        .set(hand, HandPose::new(position, orientation, timestamp));
    Some(ok_response(msg_id))
}

/// Tracking lost: drop any pose latched for this frame.
fn handle_hand_lost(state: &mut RigState, msg_id: i64, value: &Value) -> Option<String> {
    let hand = match parse_hand(value, "hand") {
        Ok(h) => h,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    state.pending.clear(hand);
    debug!(hand = hand.as_str(), "hand tracking lost");
    Some(ok_response(msg_id))
}

fn interactor_id(value: &Value) -> Result<u32, String> {
    match get_int(value, "interactor") {
        Some(id) => u32::try_from(id).map_err(|_| format!("invalid :interactor: {id}")),
        None => Ok(0),
    }
}

fn handle_grab_begin(state: &mut RigState, msg_id: i64, value: &Value) -> Option<String> {
    let wheel = match parse_hand(value, "wheel") {
        Ok(w) => w,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    let interactor = match interactor_id(value) {
        Ok(id) => id,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    let hand = match get_keyword(value, "hand") {
        Some(s) => match Hand::parse(&s) {
            Some(h) => Some(h),
            None => return Some(error_response(msg_id, &format!("invalid :hand: {s}"))),
        },
        None => None,
    };
    let Some(position) = get_vec3(value, "position") else {
        return Some(error_response(msg_id, "missing or invalid :position"));
    };

    let hand = state.rig.grab_begin(wheel, interactor, hand, position);
    Some(format!(
        "(:type :response :id {} :status :ok :wheel :{} :hand :{})",
        msg_id,
        wheel.as_str(),
        hand.as_str()
    ))
}

fn handle_grab_move(state: &mut RigState, msg_id: i64, value: &Value) -> Option<String> {
    let wheel = match parse_hand(value, "wheel") {
        Ok(w) => w,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    let interactor = match interactor_id(value) {
        Ok(id) => id,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    let Some(position) = get_vec3(value, "position") else {
        return Some(error_response(msg_id, "missing or invalid :position"));
    };

    if state.rig.grab_move(wheel, interactor, position) {
        Some(ok_response(msg_id))
    } else {
        Some(error_response(msg_id, "interactor does not hold this wheel"))
    }
}

fn handle_grab_end(state: &mut RigState, msg_id: i64, value: &Value) -> Option<String> {
    let wheel = match parse_hand(value, "wheel") {
        Ok(w) => w,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };
    let interactor = match interactor_id(value) {
        Ok(id) => id,
        Err(reason) => return Some(error_response(msg_id, &reason)),
    };

    if state.rig.grab_end(wheel, interactor) {
        Some(ok_response(msg_id))
    } else {
        Some(error_response(msg_id, "interactor does not hold this wheel"))
    }
}

// ── Status & config ────────────────────────────────────────

fn handle_rig_status(state: &mut RigState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :rig {})",
        msg_id,
        state.rig.status_sexp()
    ))
}

/// Overlay any config keys in the message, then reply with the full config.
fn handle_rig_config(state: &mut RigState, msg_id: i64, value: &Value) -> Option<String> {
    let applied = state.config.apply_plist(value);
    if applied > 0 {
        state.rig.apply_config(&state.config);
        info!(keys = applied, "rig config updated over IPC");
    }
    Some(format!(
        "(:type :response :id {} :status :ok :applied {} :config {})",
        msg_id,
        applied,
        state.config.to_sexp()
    ))
}

fn handle_rotation_status(state: &mut RigState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :rotation {})",
        msg_id,
        state.rig.detector.status_sexp()
    ))
}

fn handle_vehicle_status(state: &mut RigState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :vehicle {})",
        msg_id,
        state.rig.vehicle.status_sexp()
    ))
}

fn handle_frame_timing(state: &mut RigState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :timing {})",
        msg_id,
        state.frame_timing.stats_sexp()
    ))
}

// ── Commands ───────────────────────────────────────────────

fn handle_rig_reset(state: &mut RigState, msg_id: i64) -> Option<String> {
    state.rig.reset();
    info!("rig reset over IPC");
    Some(ok_response(msg_id))
}

fn handle_rig_reset_to_center(state: &mut RigState, msg_id: i64) -> Option<String> {
    state.rig.reset_to_center();
    info!("rig reset to play-area center over IPC");
    Some(format!(
        "(:type :response :id {} :status :ok :position {})",
        msg_id,
        vec3_sexp(&state.rig.vehicle.body.position)
    ))
}

fn handle_wheelchair_mode(state: &mut RigState, msg_id: i64, value: &Value) -> Option<String> {
    let Some(enabled) = get_bool(value, "enabled") else {
        return Some(error_response(msg_id, "missing :enabled"));
    };
    state.rig.set_wheelchair_mode(enabled);
    Some(format!(
        "(:type :response :id {} :status :ok :active {})",
        msg_id,
        flag(state.rig.comfort.is_active())
    ))
}

// ── Session ────────────────────────────────────────────────

fn handle_session_set(state: &mut RigState, msg_id: i64, value: &Value) -> Option<String> {
    if state.session.is_running() {
        return Some(error_response(msg_id, "session running"));
    }

    let group = match get_keyword(value, "feedback-group") {
        Some(s) => match FeedbackGroup::parse(&s) {
            Some(g) => Some(g),
            None => return Some(error_response(msg_id, &format!("invalid :feedback-group: {s}"))),
        },
        None => None,
    };
    let phase = match get_keyword(value, "phase") {
        Some(s) => match Phase::parse(&s) {
            Some(p) => Some(p),
            None => return Some(error_response(msg_id, &format!("invalid :phase: {s}"))),
        },
        None => None,
    };
    let task = match get_keyword(value, "task") {
        Some(s) => match Task::parse(&s) {
            Some(t) => Some(t),
            None => return Some(error_response(msg_id, &format!("invalid :task: {s}"))),
        },
        None => None,
    };
    let subject = match get_int(value, "subject") {
        Some(id) => match u32::try_from(id) {
            Ok(id) => Some(id),
            Err(_) => return Some(error_response(msg_id, &format!("invalid :subject: {id}"))),
        },
        None => None,
    };

    match subject {
        Some(id) => {
            let group = group.unwrap_or(state.session.feedback_group);
            state.session.set_subject(id, group);
        }
        None => {
            if let Some(g) = group {
                state.session.feedback_group = g;
            }
        }
    }
    if let Some(p) = phase {
        state.session.phase = p;
    }
    if let Some(t) = task {
        state.session.task = t;
    }

    handle_session_status(state, msg_id)
}

fn handle_session_start(state: &mut RigState, msg_id: i64) -> Option<String> {
    let now = state.now_secs();
    if !state.session.start(now) {
        return Some(error_response(msg_id, "session already running"));
    }
    Some(ok_response(msg_id))
}

fn handle_session_end(state: &mut RigState, msg_id: i64) -> Option<String> {
    let now = state.now_secs();
    match state.session.end(now) {
        Some(duration) => Some(format!(
            "(:type :response :id {} :status :ok :duration {:.2})",
            msg_id, duration
        )),
        None => Some(error_response(msg_id, "no session running")),
    }
}

fn handle_session_status(state: &mut RigState, msg_id: i64) -> Option<String> {
    let now = state.now_secs();
    Some(format!(
        "(:type :response :id {} :status :ok :session {})",
        msg_id,
        state.session.status_sexp(now)
    ))
}

// ── Responses & events ─────────────────────────────────────

pub fn ok_response(id: i64) -> String {
    format!("(:type :response :id {} :status :ok)", id)
}

pub fn error_response(id: i64, reason: &str) -> String {
    format!(
        "(:type :response :id {} :status :error :reason \"{}\")",
        id,
        escape_string(reason)
    )
}

/// Format an event message for broadcasting.
pub fn format_event(event_type: &str, fields: &[(&str, &str)]) -> String {
    let mut s = format!("(:type :event :event :{}", event_type);
    for (key, val) in fields {
        s.push_str(&format!(" :{} {}", key, val));
    }
    s.push(')');
    s
}

/// Wire form of a rig event.
pub fn format_rig_event(event: &RigEvent) -> String {
    match event {
        RigEvent::Rotation(rotation) => format_rotation_event(rotation),
        RigEvent::Comfort(comfort) => match comfort {
            ComfortEvent::ActiveChanged(active) => {
                format_event(comfort.as_str(), &[("active", flag(*active))])
            }
            ComfortEvent::BoundaryWarning(position) | ComfortEvent::BoundaryReset(position) => {
                format_event(comfort.as_str(), &[("position", &vec3_sexp(position))])
            }
        },
    }
}

fn format_rotation_event(event: &RotationEvent) -> String {
    let channel = format!(":{}", event.channel());
    format_event(
        "wheel-rotation",
        &[("channel", &channel), ("estimate", &event.estimate().sexp())],
    )
}
