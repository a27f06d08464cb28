//! wheelchair-rig — push-rim wheelchair locomotion server.
//!
//! Tracked hand poses and wheel grabs come in over IPC; the rig turns them
//! into per-wheel rotation estimates and drives a differential-drive chair
//! body that carries the viewer.

mod backend;
mod config;
pub mod ipc;
mod plist;
pub mod rig;
mod state;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use backend::{BackendType, IpcConfig};
use config::RigConfig;

#[derive(Parser, Debug)]
#[command(name = "wheelchair-rig", about = "Hand-rim wheelchair locomotion for VR")]
struct Cli {
    /// Backend to use: headless or demo
    #[arg(long, default_value = "headless")]
    backend: String,

    /// Config plist to overlay on the defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// IPC socket path (default: $XDG_RUNTIME_DIR/wheelchair-rig.sock)
    #[arg(long)]
    ipc_socket: Option<PathBuf>,

    /// Log all IPC messages to stderr
    #[arg(long)]
    ipc_trace: bool,

    /// Exit after N seconds
    #[arg(long)]
    exit_after: Option<u64>,

    /// Update pass rate in Hz (overrides config)
    #[arg(long)]
    frame_hz: Option<f64>,

    /// Physics step rate in Hz (overrides config)
    #[arg(long)]
    physics_hz: Option<f64>,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("wheelchair-rig {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wheelchair_rig=info".into()),
        )
        .init();

    info!("wheelchair-rig v{} starting", env!("CARGO_PKG_VERSION"));

    let Some(backend_type) = BackendType::parse(&cli.backend) else {
        anyhow::bail!("unknown backend: {}. Use: headless or demo", cli.backend);
    };
    info!(backend = backend_type.as_str(), "backend selected");

    let mut config = match &cli.config {
        Some(path) => RigConfig::load(path).context("loading rig config")?,
        None => RigConfig::default(),
    };
    if let Some(hz) = cli.frame_hz.filter(|hz| *hz > 0.0) {
        config.frame_hz = hz;
    }
    if let Some(hz) = cli.physics_hz.filter(|hz| *hz > 0.0) {
        config.physics_hz = hz;
    }

    let ipc_config = IpcConfig {
        socket_path: cli.ipc_socket,
        trace: cli.ipc_trace,
    };

    backend::run(backend_type, config, ipc_config, cli.exit_after)
}
