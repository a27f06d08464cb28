//! Process state — the single struct owned by the event loop.
//!
//! `RigState` owns the rig, its config, the study session, and the IPC
//! server, and is passed as `&mut` to every calloop callback and IPC
//! handler.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::config::RigConfig;
use crate::ipc::{dispatch, IpcServer};
use crate::rig::frame_timing::FrameTiming;
use crate::rig::{HandFrame, SessionContext, WheelchairRig};

pub struct RigState {
    pub running: bool,
    pub config: RigConfig,
    pub rig: WheelchairRig,
    pub session: SessionContext,
    /// Poses received since the last update pass.
    pub pending: HandFrame,
    pub frame_timing: FrameTiming,
    pub ipc_server: IpcServer,
    start: Instant,
}

impl RigState {
    pub fn new(config: RigConfig) -> Self {
        let rig = WheelchairRig::new(&config);
        let frame_timing = FrameTiming::new(600, 1000.0 / config.frame_hz.max(1.0));
        info!(
            frame_hz = config.frame_hz,
            physics_hz = config.physics_hz,
            "rig state initialized"
        );
        Self {
            running: true,
            config,
            rig,
            session: SessionContext::new(),
            pending: HandFrame::new(),
            frame_timing,
            ipc_server: IpcServer::new(IpcServer::default_socket_path()),
            start: Instant::now(),
        }
    }

    /// Monotonic seconds since startup; the rig's time base.
    pub fn now_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Wall-clock milliseconds since the Unix epoch.
    pub fn unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Broadcast every event the rig produced since the last call.
    pub fn flush_events(&mut self) -> usize {
        let events = self.rig.drain_events();
        for event in &events {
            let msg = dispatch::format_rig_event(event);
            self.ipc_server.broadcast_event(&msg);
        }
        events.len()
    }
}

impl Default for RigState {
    fn default() -> Self {
        Self::new(RigConfig::default())
    }
}
