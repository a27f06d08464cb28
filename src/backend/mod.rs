//! Backend abstraction — headless event loop and the demo pusher.

pub mod demo;
pub mod headless;

use std::path::PathBuf;

use crate::config::RigConfig;

/// Backend type selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Driven entirely by IPC clients.
    Headless,
    /// Headless loop plus a synthetic two-handed push.
    Demo,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Headless => "headless",
            Self::Demo => "demo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "headless" => Some(Self::Headless),
            "demo" => Some(Self::Demo),
            _ => None,
        }
    }
}

/// IPC socket configuration.
#[derive(Debug, Clone, Default)]
pub struct IpcConfig {
    pub socket_path: Option<PathBuf>,
    pub trace: bool,
}

/// Run the rig with the selected backend.
pub fn run(
    backend: BackendType,
    config: RigConfig,
    ipc_config: IpcConfig,
    exit_after: Option<u64>,
) -> anyhow::Result<()> {
    match backend {
        BackendType::Headless => headless::run(config, ipc_config, exit_after),
        BackendType::Demo => demo::run(config, ipc_config, exit_after),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names() {
        for b in [BackendType::Headless, BackendType::Demo] {
            assert_eq!(BackendType::parse(b.as_str()), Some(b));
        }
        assert_eq!(BackendType::parse("drm"), None);
    }
}
