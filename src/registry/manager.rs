//! Process registry: registration, session guard, liveness sweep

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    error::{HermodError, Result},
    memory::SegmentMap,
};

use super::record::ProcessRecord;

/// Registry of live client processes.
///
/// A daemon-local mutex protects the table; the data path never touches
/// the registry.
#[derive(Debug)]
pub struct ProcessRegistry {
    records: Mutex<HashMap<String, ProcessRecord>>,
    next_session: AtomicU64,
    /// Segments every registered client is permitted to map
    segment_map: SegmentMap,
}

impl ProcessRegistry {
    /// Create a registry handing out the given segment map
    pub fn new(segment_map: SegmentMap) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            segment_map,
        }
    }

    /// Register a process.
    ///
    /// Fails with `NameInUse` while a live record holds the name. On
    /// success returns the fresh session id, strictly greater than any
    /// previously issued, together with the segment map the client may use.
    pub fn register(
        &self,
        name: &str,
        pid: u32,
        user: &str,
        monitored: bool,
    ) -> Result<(u64, SegmentMap)> {
        if name.is_empty() {
            return Err(HermodError::invalid_parameter(
                "name",
                "process name must not be empty",
            ));
        }

        let mut records = self.records.lock().unwrap();
        if records.contains_key(name) {
            return Err(HermodError::name_in_use(name));
        }

        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let segments = self.segment_map.iter().map(|m| m.segment_id).collect();
        records.insert(
            name.to_string(),
            ProcessRecord {
                name: name.to_string(),
                pid,
                user: user.to_string(),
                monitored,
                session_id,
                last_seen: Instant::now(),
                segments,
            },
        );

        info!(
            "registered process {} (pid {}, session {}, monitored: {})",
            name, pid, session_id, monitored
        );
        Ok((session_id, self.segment_map.clone()))
    }

    /// Remove a record; the caller is responsible for tearing down the
    /// process's ports first
    pub fn deregister(&self, name: &str) -> Result<ProcessRecord> {
        let record = self
            .records
            .lock()
            .unwrap()
            .remove(name)
            .ok_or_else(|| HermodError::unknown_process(name))?;

        info!("deregistered process {} (session {})", name, record.session_id);
        Ok(record)
    }

    /// Refresh a record's liveness timestamp.
    ///
    /// Returns `true` when the record exists and the session matches.
    /// A mismatched session is a delayed message from a crashed
    /// predecessor and is dropped silently.
    pub fn touch(&self, name: &str, session_id: u64) -> bool {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(name) {
            Some(record) if record.session_id == session_id => {
                record.last_seen = Instant::now();
                true
            }
            Some(record) => {
                debug!(
                    "dropping stale message for {}: session {} (current {})",
                    name, session_id, record.session_id
                );
                false
            }
            None => {
                debug!("dropping message for unknown process {}", name);
                false
            }
        }
    }

    /// Collect the names of monitored records past the keepalive deadline.
    ///
    /// The caller performs the actual deregistration so that port teardown
    /// and client notification happen in one place.
    pub fn sweep(&self, now: Instant, deadline: Duration) -> Vec<String> {
        let records = self.records.lock().unwrap();
        let stale: Vec<String> = records
            .values()
            .filter(|r| r.is_stale(now, deadline))
            .map(|r| r.name.clone())
            .collect();

        for name in &stale {
            warn!("process {} missed its keepalive deadline", name);
        }
        stale
    }

    /// Look up a record by name
    pub fn get(&self, name: &str) -> Option<ProcessRecord> {
        self.records.lock().unwrap().get(name).cloned()
    }

    /// Names of all live records
    pub fn names(&self) -> Vec<String> {
        self.records.lock().unwrap().keys().cloned().collect()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Whether no process is registered
    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    /// The segment map handed to registering clients
    pub fn segment_map(&self) -> &SegmentMap {
        &self.segment_map
    }
}
