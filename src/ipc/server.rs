//! IPC server: Unix socket listener + per-client state + message framing.
//!
//! Frames are a u32 big-endian length followed by a UTF-8 s-expression.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};
use tracing::{debug, error, info, warn};

use super::dispatch;
use crate::state::RigState;

/// Maximum message payload size (1 MiB).
const MAX_MESSAGE_SIZE: u32 = 1_048_576;

/// Maximum write buffer before dropping events (64 KiB).
const MAX_WRITE_BUFFER: usize = 65_536;

/// Default rate limit: messages per second per client.  Pose streaming
/// for two hands at 90 Hz plus grab traffic fits comfortably.
pub const DEFAULT_RATE_LIMIT: u32 = 600;

/// Rate limit window duration in seconds.
const RATE_LIMIT_WINDOW_SECS: u64 = 1;

/// A mapped pose older than this re-anchors the client clock.
const CLOCK_REBASE_SECS: f64 = 1.0;

/// Per-client rate limiter.
pub struct RateLimiter {
    window_start: Instant,
    message_count: u32,
    pub max_per_second: u32,
}

impl RateLimiter {
    pub fn new(max_per_second: u32) -> Self {
        Self {
            window_start: Instant::now(),
            message_count: 0,
            max_per_second,
        }
    }

    /// Returns true if a message is within the limit.
    pub fn check(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start).as_secs() >= RATE_LIMIT_WINDOW_SECS {
            self.window_start = now;
            self.message_count = 1;
            true
        } else {
            self.message_count += 1;
            self.message_count <= self.max_per_second
        }
    }
}

/// Maps a client's pose timestamps onto the rig clock.
///
/// The first stamped pose fixes the offset between the two clocks.  Mapped
/// times never run ahead of the rig, and a client clock that jumps back
/// (a restarted tracker) is re-anchored.
#[derive(Debug, Clone, Default)]
pub struct ClientClock {
    offset: Option<f64>,
}

impl ClientClock {
    /// Rig time for `client_ts`, given the rig's current time `now`.
    pub fn map(&mut self, client_ts: f64, now: f64) -> f64 {
        let offset = *self.offset.get_or_insert(now - client_ts);
        let mapped = client_ts + offset;
        if mapped < now - CLOCK_REBASE_SECS {
            debug!(client_ts, now, "client clock jumped back, re-anchoring");
            self.offset = Some(now - client_ts);
            return now;
        }
        mapped.min(now)
    }

    /// Rig time minus client time, once known.
    pub fn offset(&self) -> Option<f64> {
        self.offset
    }
}

/// Peer credentials via SO_PEERCRED on Linux; unknown elsewhere.
fn get_peer_cred(stream: &UnixStream) -> Option<(Option<u32>, Option<i32>)> {
    #[cfg(target_os = "linux")]
    {
        let fd = stream.as_raw_fd();
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if ret == 0 {
            Some((Some(cred.uid), Some(cred.pid)))
        } else {
            None
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = stream.as_raw_fd();
        Some((None, None))
    }
}

/// Per-client IPC connection state.
pub struct IpcClient {
    pub stream: UnixStream,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    pub authenticated: bool,
    pub id: u64,
    /// Name given in the hello handshake.
    pub name: Option<String>,
    /// Peer UID from SO_PEERCRED.
    pub peer_uid: Option<u32>,
    /// Peer PID from SO_PEERCRED.
    pub peer_pid: Option<i32>,
    pub rate_limiter: RateLimiter,
    /// Offset of the client's pose timestamps from the rig clock.
    pub clock: ClientClock,
    /// Set on a framing violation; the client is dropped on the next poll.
    pub protocol_error: bool,
}

impl IpcClient {
    pub fn new(stream: UnixStream, id: u64) -> Self {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(client_id = id, "failed to set non-blocking: {}", e);
        }

        let (peer_uid, peer_pid) = get_peer_cred(&stream).unwrap_or_else(|| {
            warn!(client_id = id, "failed to read peer credentials");
            (None, None)
        });
        if let Some(uid) = peer_uid {
            debug!(client_id = id, peer_uid = uid, peer_pid = ?peer_pid, "peer credentials");
        }

        Self {
            stream,
            read_buf: Vec::with_capacity(4096),
            write_buf: Vec::new(),
            authenticated: false,
            id,
            name: None,
            peer_uid,
            peer_pid,
            rate_limiter: RateLimiter::new(DEFAULT_RATE_LIMIT),
            clock: ClientClock::default(),
            protocol_error: false,
        }
    }

    /// Attempt to flush pending writes.
    pub fn flush_writes(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write zero")),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Enqueue a framed message (length prefix + payload).
    pub fn enqueue_message(&mut self, payload: &str) {
        let bytes = payload.as_bytes();
        let len = bytes.len() as u32;
        self.write_buf.extend_from_slice(&len.to_be_bytes());
        self.write_buf.extend_from_slice(bytes);
    }

    /// Enqueue an event unless the client has fallen too far behind.
    pub fn enqueue_event(&mut self, payload: &str) -> bool {
        if self.write_buf.len() > MAX_WRITE_BUFFER {
            warn!(client_id = self.id, "write buffer overflow, dropping event");
            return false;
        }
        self.enqueue_message(payload);
        true
    }

    /// Extract complete framed messages from the read buffer.
    pub fn extract_messages(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while self.read_buf.len() >= 4 {
            let len = u32::from_be_bytes([
                self.read_buf[0],
                self.read_buf[1],
                self.read_buf[2],
                self.read_buf[3],
            ]);
            if len > MAX_MESSAGE_SIZE {
                error!(client_id = self.id, len, "message exceeds maximum size");
                self.read_buf.clear();
                self.protocol_error = true;
                break;
            }
            let total = 4 + len as usize;
            if self.read_buf.len() < total {
                break;
            }
            let payload = String::from_utf8_lossy(&self.read_buf[4..total]).to_string();
            self.read_buf.drain(..total);
            messages.push(payload);
        }
        messages
    }
}

/// Listener socket path and all client connections.
pub struct IpcServer {
    pub socket_path: PathBuf,
    pub clients: HashMap<u64, IpcClient>,
    next_client_id: u64,
    pub ipc_trace: bool,
}

impl IpcServer {
    /// Unbound server; `bind` registers the listener.
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            clients: HashMap::new(),
            next_client_id: 1,
            ipc_trace: false,
        }
    }

    /// `$XDG_RUNTIME_DIR/wheelchair-rig.sock`, falling back to /tmp.
    pub fn default_socket_path() -> PathBuf {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .unwrap_or_else(|_| format!("/tmp/wheelchair-rig-{}", unsafe { libc::getuid() }));
        PathBuf::from(runtime_dir).join("wheelchair-rig.sock")
    }

    /// Register a connected stream and return its client id.
    pub fn add_client(&mut self, stream: UnixStream) -> u64 {
        let client_id = self.next_client_id;
        self.next_client_id += 1;
        self.clients.insert(client_id, IpcClient::new(stream, client_id));
        client_id
    }

    /// Bind the listener socket and register it with calloop.
    pub fn bind(socket_path: &Path, loop_handle: &LoopHandle<'static, RigState>) -> anyhow::Result<()> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating socket directory {}", parent.display()))?;
        }
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("removing stale socket {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("binding {}", socket_path.display()))?;
        listener.set_nonblocking(true)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o700))?;
        }

        info!(?socket_path, "IPC server listening");

        let source = Generic::new(listener, Interest::READ, Mode::Level);
        loop_handle
            .insert_source(source, |_event, listener, state| {
                loop {
                    match listener.accept() {
                        Ok((stream, _addr)) => {
                            let client_id = state.ipc_server.add_client(stream);
                            info!(client_id, "IPC client connected");
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            error!("accept error: {}", e);
                            break;
                        }
                    }
                }
                Ok(PostAction::Continue)
            })
            .map_err(|e| e.error)
            .context("registering IPC listener")?;

        Ok(())
    }

    /// Read, dispatch, and answer every client.  Called once per frame,
    /// before the update pass.
    pub fn poll_clients(state: &mut RigState) {
        let client_ids: Vec<u64> = state.ipc_server.clients.keys().copied().collect();
        let mut disconnected = Vec::new();

        for client_id in client_ids {
            let messages = {
                let Some(client) = state.ipc_server.clients.get_mut(&client_id) else {
                    continue;
                };
                let mut buf = [0u8; 4096];
                let read_result = loop {
                    match client.stream.read(&mut buf) {
                        Ok(0) => break Err(io::Error::new(io::ErrorKind::ConnectionReset, "eof")),
                        Ok(n) => client.read_buf.extend_from_slice(&buf[..n]),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => break Err(e),
                    }
                };
                let messages = client.extract_messages();
                if let Err(e) = read_result {
                    debug!(client_id, "client disconnected: {}", e);
                    disconnected.push(client_id);
                } else if client.protocol_error {
                    disconnected.push(client_id);
                }
                messages
            };

            for msg_str in messages {
                let rate_ok = state
                    .ipc_server
                    .clients
                    .get_mut(&client_id)
                    .map(|c| c.rate_limiter.check())
                    .unwrap_or(false);

                if !rate_ok {
                    warn!(client_id, "rate limit exceeded, dropping message");
                    let resp = dispatch::error_response(0, "rate limit exceeded");
                    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
                        client.enqueue_message(&resp);
                    }
                    continue;
                }

                if state.ipc_server.ipc_trace {
                    info!(client_id, "<< {}", msg_str);
                }
                if let Some(resp) = dispatch::handle_message(state, client_id, &msg_str) {
                    if state.ipc_server.ipc_trace {
                        info!(client_id, ">> {}", resp);
                    }
                    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
                        client.enqueue_message(&resp);
                    }
                }
            }
        }

        disconnected.extend(state.ipc_server.flush_all());
        for id in disconnected {
            if state.ipc_server.clients.remove(&id).is_some() {
                info!(client_id = id, "removing disconnected IPC client");
            }
        }
    }

    /// Flush every client, returning the ids whose writes failed.
    pub fn flush_all(&mut self) -> Vec<u64> {
        let mut failed = Vec::new();
        for (id, client) in self.clients.iter_mut() {
            if let Err(e) = client.flush_writes() {
                debug!(client_id = *id, "write error: {}", e);
                failed.push(*id);
            }
        }
        failed
    }

    /// Queue an event for every authenticated client.
    pub fn broadcast_event(&mut self, event: &str) {
        if self.ipc_trace {
            info!("broadcast >> {}", event);
        }
        for client in self.clients.values_mut() {
            if client.authenticated {
                client.enqueue_event(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &str) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload.as_bytes());
        out
    }

    #[test]
    fn test_extract_split_frames() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut client = IpcClient::new(a, 1);
        let mut bytes = frame("(:type :ping)");
        bytes.extend(frame("(:type :rig-status)"));
        client.read_buf.extend_from_slice(&bytes[..6]);
        assert!(client.extract_messages().is_empty());
        client.read_buf.extend_from_slice(&bytes[6..]);
        let msgs = client.extract_messages();
        assert_eq!(msgs, vec!["(:type :ping)", "(:type :rig-status)"]);
        assert!(client.read_buf.is_empty());
    }

    #[test]
    fn test_oversized_frame_flags_client() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut client = IpcClient::new(a, 1);
        client.read_buf.extend_from_slice(&(MAX_MESSAGE_SIZE + 1).to_be_bytes());
        assert!(client.extract_messages().is_empty());
        assert!(client.protocol_error);
    }

    #[test]
    fn test_enqueue_and_flush() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut client = IpcClient::new(a, 1);
        client.enqueue_message("(:type :event)");
        client.flush_writes().unwrap();
        let mut buf = vec![0u8; 4 + 14];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..4], &14u32.to_be_bytes());
        assert_eq!(&buf[4..], b"(:type :event)");
    }

    #[test]
    fn test_event_backpressure() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut client = IpcClient::new(a, 1);
        client.write_buf = vec![0u8; MAX_WRITE_BUFFER + 1];
        assert!(!client.enqueue_event("(:type :event)"));
        assert_eq!(client.write_buf.len(), MAX_WRITE_BUFFER + 1);
    }

    #[test]
    fn test_rate_limiter() {
        let mut limiter = RateLimiter::new(3);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn test_client_clock_behind_rig() {
        let mut clock = ClientClock::default();
        // Tracker started 5 s after the rig
        assert_eq!(clock.map(0.0, 5.0), 5.0);
        assert!((clock.map(0.1, 5.1) - 5.1).abs() < 1e-9);
        assert!((clock.offset().unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_client_clock_ahead_of_rig() {
        let mut clock = ClientClock::default();
        assert_eq!(clock.map(1000.0, 2.0), 2.0);
        // A pose stamped before a 0.6 s gap stays 0.6 s old
        let before_gap = clock.map(1000.2, 2.2);
        let after_gap = clock.map(1000.8, 2.8);
        assert!((after_gap - before_gap - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_client_clock_never_ahead_and_rebases() {
        let mut clock = ClientClock::default();
        clock.map(10.0, 10.0);
        assert_eq!(clock.map(12.0, 10.5), 10.5);
        // Tracker restarted at zero
        assert_eq!(clock.map(0.0, 11.0), 11.0);
        assert!((clock.map(0.1, 11.1) - 11.1).abs() < 1e-9);
    }

    #[test]
    fn test_mismatched_clocks_still_detect_rotation() {
        use crate::rig::math::{Quat, Vec3, DEG2RAD};
        use crate::rig::{Hand, HandFrame, HandPose, RigEvent, WheelchairRig};

        const DT: f64 = 1.0 / 90.0;
        for rig_start in [5.0, -5.0] {
            let mut rig = WheelchairRig::default();
            let mut clock = ClientClock::default();
            for i in 0..30 {
                let client_t = 100.0 + i as f64 * DT;
                let now = 100.0 + rig_start + i as f64 * DT;
                let a = (90.0 * (i as f64 * DT) as f32) * DEG2RAD;
                let pos = Vec3::new(0.3 * a.sin(), 0.0, 0.3 * a.cos());
                let mut frame = HandFrame::new();
                frame.set(Hand::Right, HandPose::new(pos, Quat::identity(), clock.map(client_t, now)));
                rig.update(&frame, now, DT as f32);
            }
            let rotations = rig
                .drain_events()
                .into_iter()
                .filter(|e| matches!(e, RigEvent::Rotation(_)))
                .count();
            assert!(rotations > 20, "rig offset {rig_start}: {rotations} rotation events");
            assert!(rig.detector.history_len(Hand::Right) >= 3);
        }
    }

    #[test]
    fn test_broadcast_skips_unauthenticated() {
        let mut server = IpcServer::new(PathBuf::from("/tmp/unused.sock"));
        let (a, _b) = UnixStream::pair().unwrap();
        let (c, _d) = UnixStream::pair().unwrap();
        let first = server.add_client(a);
        let second = server.add_client(c);
        if let Some(client) = server.clients.get_mut(&first) {
            client.authenticated = true;
        }
        server.broadcast_event("(:type :event :event :test)");
        assert!(!server.clients[&first].write_buf.is_empty());
        assert!(server.clients[&second].write_buf.is_empty());
    }
}
