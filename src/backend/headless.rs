//! Headless backend — the rig's event loop.
//!
//! Each iteration polls IPC clients, then runs at most one frame: the
//! variable-rate update pass followed by as many fixed-rate physics steps
//! as the accumulated time allows.  Between frames the loop sleeps in
//! calloop until the next frame is due or the listener wakes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use calloop::EventLoop;
use tracing::{info, trace};

use super::IpcConfig;
use crate::config::RigConfig;
use crate::ipc::IpcServer;
use crate::state::RigState;

/// Global flag set by SIGTERM/SIGINT handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Longest frame delta fed to the update pass (seconds).
pub const MAX_FRAME_DT: f32 = 0.1;

/// Physics steps allowed per frame before the backlog is dropped.
pub const MAX_PHYSICS_STEPS: u32 = 8;

/// Fixed-timestep accumulator for the physics pass.
#[derive(Debug, Clone)]
pub struct FixedStep {
    step: f32,
    accumulator: f32,
}

impl FixedStep {
    pub fn new(hz: f64) -> Self {
        Self {
            step: (1.0 / hz.max(1.0)) as f32,
            accumulator: 0.0,
        }
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    /// Add `dt` and return how many steps are due.  Backlog beyond
    /// `MAX_PHYSICS_STEPS` is discarded.
    pub fn advance(&mut self, dt: f32) -> u32 {
        if dt.is_finite() && dt > 0.0 {
            self.accumulator += dt;
        }
        let mut steps = 0;
        while self.accumulator >= self.step && steps < MAX_PHYSICS_STEPS {
            self.accumulator -= self.step;
            steps += 1;
        }
        if steps == MAX_PHYSICS_STEPS && self.accumulator >= self.step {
            trace!(backlog = self.accumulator, "dropping physics backlog");
            self.accumulator %= self.step;
        }
        steps
    }
}

/// One frame: update pass, physics steps, event broadcast.
pub fn run_frame(state: &mut RigState, physics: &mut FixedStep, now: f64, dt: f32) {
    let dt = dt.clamp(0.0, MAX_FRAME_DT);
    let frame = state.pending.take();

    let update_start = Instant::now();
    state.rig.update(&frame, now, dt);
    let update_ms = update_start.elapsed().as_secs_f64() * 1000.0;

    let physics_start = Instant::now();
    let steps = physics.advance(dt);
    for _ in 0..steps {
        state.rig.physics_step(physics.step());
    }
    let physics_ms = physics_start.elapsed().as_secs_f64() * 1000.0;

    state.frame_timing.record(update_ms, physics_ms, steps);
    state.flush_events();
}

/// Install signal handlers for graceful shutdown (SIGTERM, SIGINT).
fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Run the rig headless, driven by IPC clients.
pub fn run(config: RigConfig, ipc_config: IpcConfig, exit_after: Option<u64>) -> anyhow::Result<()> {
    run_with(config, ipc_config, exit_after, |_, _| {})
}

/// Run the loop, calling `inject(state, now)` before each frame.
pub fn run_with<F>(
    config: RigConfig,
    ipc_config: IpcConfig,
    exit_after: Option<u64>,
    mut inject: F,
) -> anyhow::Result<()>
where
    F: FnMut(&mut RigState, f64),
{
    let mut event_loop = EventLoop::<RigState>::try_new()?;
    let mut state = RigState::new(config);

    state.ipc_server.ipc_trace = ipc_config.trace;
    let ipc_path = ipc_config
        .socket_path
        .unwrap_or_else(IpcServer::default_socket_path);
    state.ipc_server.socket_path = ipc_path.clone();
    IpcServer::bind(&ipc_path, &event_loop.handle())?;

    install_signal_handlers();

    let frame_period = Duration::from_secs_f64(1.0 / state.config.frame_hz);
    let mut physics = FixedStep::new(state.config.physics_hz);

    let start_time = Instant::now();
    let exit_duration = exit_after.map(Duration::from_secs);
    let mut last_status_log = Instant::now();
    let status_interval = Duration::from_secs(60);
    let mut last_frame = Instant::now();

    info!(
        frame_hz = state.config.frame_hz,
        physics_hz = state.config.physics_hz,
        "headless backend initialized, entering event loop"
    );

    while state.running {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            info!("Shutdown signal received, exiting");
            state.running = false;
            break;
        }

        if let Some(dur) = exit_duration {
            if start_time.elapsed() >= dur {
                info!("Headless exit timer fired after {}s", dur.as_secs());
                state.running = false;
                break;
            }
        }

        if last_status_log.elapsed() >= status_interval {
            let stats = state.frame_timing.stats();
            info!(
                clients = state.ipc_server.clients.len(),
                frames = stats.total_frames,
                over_budget = stats.over_budget_frames,
                speed = state.rig.vehicle.current_velocity().norm(),
                "Headless status"
            );
            last_status_log = Instant::now();
        }

        IpcServer::poll_clients(&mut state);

        let since_frame = last_frame.elapsed();
        if since_frame >= frame_period {
            last_frame = Instant::now();
            let now = state.now_secs();
            inject(&mut state, now);
            run_frame(&mut state, &mut physics, now, since_frame.as_secs_f32());
        }

        let timeout = frame_period.saturating_sub(last_frame.elapsed());
        event_loop.dispatch(Some(timeout), &mut state)?;
    }

    if let Err(e) = std::fs::remove_file(&state.ipc_server.socket_path) {
        tracing::debug!("socket cleanup: {}", e);
    }

    let stats = state.frame_timing.stats();
    info!(
        frames = stats.total_frames,
        clients = state.ipc_server.clients.len(),
        "Headless backend shutting down"
    );
    Ok(())
}
