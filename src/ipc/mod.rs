//! IPC — length-prefixed s-expressions over a Unix socket.

pub mod dispatch;
pub mod server;

pub use server::IpcServer;
