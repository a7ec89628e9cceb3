//! Per-client process records

use std::time::Instant;

use crate::memory::SegmentId;

/// Record of one registered client process.
///
/// The session id is issued at registration and strictly increases for the
/// daemon lifetime; it lets the registry tell a crashed predecessor's
/// delayed traffic apart from a live successor registered under the same
/// name.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    /// Unique name; equal to the client's control-channel name
    pub name: String,
    /// Host OS process id
    pub pid: u32,
    /// OS user the process runs as
    pub user: String,
    /// Whether the liveness sweep watches this process
    pub monitored: bool,
    /// Session id issued at registration
    pub session_id: u64,
    /// Last time the daemon heard from the process
    pub last_seen: Instant,
    /// Segments the process is permitted to map
    pub segments: Vec<SegmentId>,
}

impl ProcessRecord {
    /// Whether the record is past the keepalive deadline at `now`
    pub fn is_stale(&self, now: Instant, deadline: std::time::Duration) -> bool {
        self.monitored && now.duration_since(self.last_seen) > deadline
    }
}
