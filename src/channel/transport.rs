//! Unix datagram endpoints for the control channel

use std::{
    fs,
    os::fd::{AsRawFd, RawFd},
    os::unix::fs::PermissionsExt,
    os::unix::net::UnixDatagram,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{HermodError, Result};

use super::message::MAX_FRAME_BYTES;

/// Socket file name the daemon listens on inside the runtime directory
pub const BROKER_SOCKET: &str = "broker.sock";

/// Path of the daemon's well-known socket
pub fn broker_socket_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(BROKER_SOCKET)
}

/// Path of a client's notification socket, derived from its process name
pub fn client_socket_path(runtime_dir: &Path, name: &str) -> PathBuf {
    runtime_dir.join(format!("{}.sock", name))
}

/// Recover the process name a bound socket path encodes
pub fn name_from_socket_path(path: &Path) -> Option<String> {
    let file = path.file_name()?.to_str()?;
    let name = file.strip_suffix(".sock")?;
    if name.is_empty() || name == "broker" {
        return None;
    }
    Some(name.to_string())
}

/// One bound datagram endpoint of the control channel
#[derive(Debug)]
pub struct ChannelEndpoint {
    socket: UnixDatagram,
    path: PathBuf,
}

impl ChannelEndpoint {
    /// Bind an endpoint, replacing any stale socket file.
    ///
    /// The runtime directory is created with owner-only permissions; the
    /// socket file itself gets mode 0600.
    pub fn bind(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| HermodError::from_io(e, "Failed to create runtime directory"))?;
            let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
        }

        if path.exists() {
            fs::remove_file(&path)
                .map_err(|e| HermodError::from_io(e, "Failed to remove stale socket"))?;
        }

        let socket = UnixDatagram::bind(&path)
            .map_err(|e| HermodError::from_io(e, "Failed to bind control socket"))?;
        let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));

        Ok(Self { socket, path })
    }

    /// Send one frame to a peer endpoint
    pub fn send_to(&self, frame: &str, peer: &Path) -> Result<()> {
        if frame.len() > MAX_FRAME_BYTES {
            return Err(HermodError::protocol(format!(
                "frame of {} bytes exceeds the {} byte limit",
                frame.len(),
                MAX_FRAME_BYTES
            )));
        }

        self.socket
            .send_to(frame.as_bytes(), peer)
            .map_err(|e| HermodError::from_io(e, "Failed to send control frame"))?;
        Ok(())
    }

    /// Receive one frame together with the sender's socket path, if bound.
    ///
    /// Returns `Ok(None)` when the socket is non-blocking and no datagram
    /// is pending, or when a blocking read times out.
    pub fn recv(&self) -> Result<Option<(String, Option<PathBuf>)>> {
        let mut buf = [0u8; MAX_FRAME_BYTES];
        match self.socket.recv_from(&mut buf) {
            Ok((len, addr)) => {
                let frame = String::from_utf8(buf[..len].to_vec())
                    .map_err(|_| HermodError::protocol("frame is not valid UTF-8"))?;
                let sender = addr.as_pathname().map(|p| p.to_path_buf());
                Ok(Some((frame, sender)))
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(HermodError::from_io(e, "Failed to receive control frame")),
        }
    }

    /// Switch the endpoint between blocking and non-blocking reads
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.socket
            .set_nonblocking(nonblocking)
            .map_err(|e| HermodError::from_io(e, "Failed to switch blocking mode"))
    }

    /// Bound a blocking read; `None` waits indefinitely
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket
            .set_read_timeout(timeout)
            .map_err(|e| HermodError::from_io(e, "Failed to set read timeout"))
    }

    /// The endpoint's bound path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRawFd for ChannelEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl Drop for ChannelEndpoint {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
