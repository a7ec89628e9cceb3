//! Liveness supervision: process teardown and the sweep thread

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    channel::{client_socket_path, ChannelEndpoint, ControlResponse},
    error::Result,
    port::{MatchEvent, PortManager},
    registry::ProcessRegistry,
};

/// Tears down dead or departing processes and notifies affected peers.
///
/// Shared by the control loop (explicit deregister, malformed frames) and
/// the supervisor thread (keepalive expiry) so cleanup happens in exactly
/// one place.
#[derive(Debug)]
pub struct ProcessReaper {
    registry: Arc<ProcessRegistry>,
    ports: Arc<PortManager>,
    endpoint: Arc<ChannelEndpoint>,
    runtime_dir: PathBuf,
}

impl ProcessReaper {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        ports: Arc<PortManager>,
        endpoint: Arc<ChannelEndpoint>,
        runtime_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            ports,
            endpoint,
            runtime_dir,
        }
    }

    /// Destroy every port owned by the process, notify its peers, and
    /// remove the record
    pub fn teardown(&self, name: &str) -> Result<()> {
        let events = self.ports.destroy_process_ports(name)?;
        self.notify(&events);
        self.registry.deregister(name)?;
        Ok(())
    }

    /// Deregister every monitored process past the keepalive deadline
    pub fn sweep_once(&self, deadline: Duration) {
        for name in self.registry.sweep(Instant::now(), deadline) {
            if let Err(e) = self.teardown(&name) {
                warn!("teardown of swept process {} failed: {}", name, e);
            }
        }
    }

    /// Route match events to both affected processes.
    ///
    /// Send failures are expected (the peer may just have died) and only
    /// logged.
    pub fn notify(&self, events: &[MatchEvent]) {
        for event in events {
            let (publisher_owner, subscriber_owner, to_subscriber, to_publisher) = match event {
                MatchEvent::Matched {
                    service,
                    publisher_owner,
                    subscriber_owner,
                } => (
                    publisher_owner,
                    subscriber_owner,
                    ControlResponse::Matched {
                        service: service.clone(),
                        peer: publisher_owner.clone(),
                    },
                    ControlResponse::Matched {
                        service: service.clone(),
                        peer: subscriber_owner.clone(),
                    },
                ),
                MatchEvent::Unmatched {
                    service,
                    publisher_owner,
                    subscriber_owner,
                } => (
                    publisher_owner,
                    subscriber_owner,
                    ControlResponse::Unmatched {
                        service: service.clone(),
                        peer: publisher_owner.clone(),
                    },
                    ControlResponse::Unmatched {
                        service: service.clone(),
                        peer: subscriber_owner.clone(),
                    },
                ),
            };

            self.send(subscriber_owner, &to_subscriber);
            self.send(publisher_owner, &to_publisher);
        }
    }

    /// Send a response to a client's notification socket
    pub fn send(&self, name: &str, response: &ControlResponse) {
        let peer = client_socket_path(&self.runtime_dir, name);
        if let Err(e) = self.endpoint.send_to(&response.encode(), &peer) {
            debug!("could not notify {}: {}", name, e);
        }
    }
}

/// Dedicated sweep thread driving the reaper on the monitoring timer
#[derive(Debug)]
pub struct Supervisor {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Supervisor {
    /// Spawn the supervisor thread
    pub fn spawn(
        reaper: Arc<ProcessReaper>,
        interval: Duration,
        deadline: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("hermod-supervisor".to_string())
            .spawn(move || {
                while !thread_shutdown.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    reaper.sweep_once(deadline);
                }
            })
            .map_err(|e| crate::error::HermodError::from_io(e, "Failed to spawn supervisor"))?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
