//! The broker: segment ownership, control loop, request dispatch

use std::{
    os::fd::AsRawFd,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, info, warn};
use mio::{unix::SourceFd, Events, Interest, Poll, Token};
use nix::unistd::{Uid, User};

use crate::{
    channel::{
        broker_socket_path, client_socket_path, name_from_socket_path, ChannelEndpoint,
        ControlRequest, ControlResponse,
    },
    chunk::ChunkAllocator,
    error::{HermodError, Result},
    memory::{AccessMode, Segment, SegmentId, SegmentMap, SegmentMapping},
    port::PortManager,
    queue::QueueArena,
    registry::ProcessRegistry,
};

use super::{
    config::BrokerConfig,
    supervisor::{ProcessReaper, Supervisor},
};

/// Segment id of the management segment (queue storage)
pub const MANAGEMENT_SEGMENT_ID: SegmentId = 0;
/// Segment id of the payload segment (chunk pools)
pub const PAYLOAD_SEGMENT_ID: SegmentId = 1;

const CONTROL_TOKEN: Token = Token(0);

/// The supervisory daemon process.
///
/// Owns the shared-memory segments, matches ports by service identifier,
/// and supervises client liveness. The data path never enters the broker;
/// only setup and teardown flow through it.
#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    endpoint: Arc<ChannelEndpoint>,
    registry: Arc<ProcessRegistry>,
    ports: Arc<PortManager>,
    allocator: Arc<ChunkAllocator>,
    reaper: Arc<ProcessReaper>,
    shutdown: Arc<AtomicBool>,
    // Dropped last: unlinks the shm objects on shutdown
    _payload_segment: Arc<Segment>,
    _management_segment: Arc<Segment>,
}

impl Broker {
    /// Create a broker: segments, pools, arena, registry, control socket
    pub fn new(config: BrokerConfig) -> Result<Self> {
        config.validate()?;

        let payload_segment = Arc::new(Segment::new(
            PAYLOAD_SEGMENT_ID,
            config.payload_segment_config(),
        )?);
        let management_segment = Arc::new(Segment::new(
            MANAGEMENT_SEGMENT_ID,
            config.management_segment_config(),
        )?);

        let allocator = Arc::new(ChunkAllocator::carve(
            Arc::clone(&payload_segment),
            &config.mempools,
        )?);
        let arena = Arc::new(QueueArena::new(Arc::clone(&management_segment)));
        let ports = Arc::new(PortManager::new(Arc::clone(&allocator), arena));

        let mut segment_map = SegmentMap::new();
        segment_map.push(SegmentMapping::describe(
            &management_segment,
            AccessMode::ReadWrite,
        ));
        segment_map.push(SegmentMapping::describe(
            &payload_segment,
            AccessMode::ReadWrite,
        ));
        let registry = Arc::new(ProcessRegistry::new(segment_map));

        let endpoint = Arc::new(ChannelEndpoint::bind(broker_socket_path(
            &config.runtime_dir,
        ))?);
        endpoint.set_nonblocking(true)?;

        let reaper = Arc::new(ProcessReaper::new(
            Arc::clone(&registry),
            Arc::clone(&ports),
            Arc::clone(&endpoint),
            config.runtime_dir.clone(),
        ));

        info!(
            "broker ready: {} ({} size classes), {} for queues, socket {}",
            payload_segment.name(),
            allocator.pool_count(),
            management_segment.name(),
            endpoint.path().display()
        );

        Ok(Self {
            config,
            endpoint,
            registry,
            ports,
            allocator,
            reaper,
            shutdown: Arc::new(AtomicBool::new(false)),
            _payload_segment: payload_segment,
            _management_segment: management_segment,
        })
    }

    /// Flag that ends the control loop when set
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// The process registry
    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// The port manager
    pub fn ports(&self) -> &Arc<PortManager> {
        &self.ports
    }

    /// The payload chunk allocator
    pub fn allocator(&self) -> &Arc<ChunkAllocator> {
        &self.allocator
    }

    /// The broker's configuration
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Run the control loop until the shutdown flag is set.
    ///
    /// Single-threaded dispatch over the broker socket; a dedicated
    /// supervisor thread drives the registry sweep on the monitoring
    /// timer.
    pub fn run(&mut self) -> Result<()> {
        let mut poll =
            Poll::new().map_err(|e| HermodError::from_io(e, "Failed to create poll"))?;
        let fd = self.endpoint.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), CONTROL_TOKEN, Interest::READABLE)
            .map_err(|e| HermodError::from_io(e, "Failed to register control socket"))?;
        let mut events = Events::with_capacity(16);

        let supervisor = Supervisor::spawn(
            Arc::clone(&self.reaper),
            self.config.monitoring_interval(),
            self.config.keepalive_timeout(),
            Arc::clone(&self.shutdown),
        )?;

        while !self.shutdown.load(Ordering::Acquire) {
            match poll.poll(&mut events, Some(self.config.monitoring_interval())) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    supervisor.stop();
                    return Err(HermodError::from_io(e, "Control poll failed"));
                }
            }
            self.drain_socket();
        }

        supervisor.stop();
        self.broadcast_terminate();
        info!("broker shut down cleanly");
        Ok(())
    }

    /// Handle every pending datagram
    fn drain_socket(&self) {
        loop {
            match self.endpoint.recv() {
                Ok(Some((frame, sender))) => self.handle_frame(&frame, sender.as_deref()),
                Ok(None) => break,
                Err(e) => {
                    warn!("control receive failed: {}", e);
                    break;
                }
            }
        }
    }

    /// Decode and dispatch one frame.
    ///
    /// Unknown operations are rejected with an ERROR reply; any other
    /// malformed frame is a liveness violation and deregisters the sender.
    fn handle_frame(&self, frame: &str, sender: Option<&Path>) {
        match ControlRequest::decode(frame) {
            Ok(request) => self.handle_request(request),
            Err(HermodError::UnknownOperation { op }) => {
                warn!("rejecting unknown control operation {:?}", op);
                if let Some(name) = sender.and_then(name_from_socket_path) {
                    self.reaper.send(
                        &name,
                        &ControlResponse::Error {
                            message: format!("unknown control operation: {}", op),
                        },
                    );
                }
            }
            Err(e) => {
                warn!("malformed control frame: {}", e);
                if let Some(name) = sender.and_then(name_from_socket_path) {
                    if self.registry.get(&name).is_some() {
                        warn!("deregistering {} after malformed frame", name);
                        if let Err(e) = self.reaper.teardown(&name) {
                            warn!("teardown of {} failed: {}", name, e);
                        }
                    }
                }
            }
        }
    }

    fn handle_request(&self, request: ControlRequest) {
        let name = request.sender().to_string();

        // Registration is the only operation without a session guard
        if let ControlRequest::Register {
            name,
            pid,
            uid,
            monitored,
        } = &request
        {
            let response = match self.registry.register(
                name,
                *pid,
                &Self::resolve_user(*uid),
                *monitored,
            ) {
                Ok((session, segments)) => ControlResponse::RegAck { session, segments },
                Err(e) => ControlResponse::Error {
                    message: e.to_string(),
                },
            };
            self.reaper.send(name, &response);
            return;
        }

        // Control traffic counts as keepalive; a session mismatch marks a
        // crashed predecessor's delayed message and is dropped silently
        let session = request.session().unwrap_or(0);
        if !self.registry.touch(&name, session) {
            debug!("dropped {} from {} (stale or unknown session)", request.op(), name);
            return;
        }

        let outcome = self.dispatch(&name, request);
        match outcome {
            Ok(Some(response)) => self.reaper.send(&name, &response),
            Ok(None) => {}
            Err(e) => self.reaper.send(
                &name,
                &ControlResponse::Error {
                    message: e.to_string(),
                },
            ),
        }
    }

    fn dispatch(
        &self,
        name: &str,
        request: ControlRequest,
    ) -> Result<Option<ControlResponse>> {
        match request {
            ControlRequest::Register { .. } => unreachable!("handled by the caller"),
            ControlRequest::Deregister { .. } => {
                self.reaper.teardown(name)?;
                Ok(None)
            }
            ControlRequest::CreatePublisher {
                service,
                history_capacity,
                ..
            } => {
                let port = self.ports.create_publisher(name, service, history_capacity);
                Ok(Some(ControlResponse::PortAck {
                    port_id: port.port_id(),
                }))
            }
            ControlRequest::DestroyPublisher { port_id, .. } => {
                let events = self.ports.destroy_publisher(name, port_id)?;
                self.reaper.notify(&events);
                Ok(None)
            }
            ControlRequest::CreateSubscriber {
                service,
                queue_capacity,
                policy,
                ..
            } => {
                let (port, events) =
                    self.ports
                        .create_subscriber(name, service, queue_capacity, policy)?;
                self.reaper.notify(&events);
                Ok(Some(ControlResponse::PortAck {
                    port_id: port.port_id(),
                }))
            }
            ControlRequest::DestroySubscriber { port_id, .. } => {
                let events = self.ports.destroy_subscriber(name, port_id)?;
                self.reaper.notify(&events);
                Ok(None)
            }
            ControlRequest::Offer { port_id, .. } => {
                let events = self.ports.offer(name, port_id)?;
                self.reaper.notify(&events);
                Ok(None)
            }
            ControlRequest::StopOffer { port_id, .. } => {
                let events = self.ports.stop_offer(name, port_id)?;
                self.reaper.notify(&events);
                Ok(None)
            }
            // the touch above already refreshed the record
            ControlRequest::Keepalive { .. } => Ok(None),
        }
    }

    /// Tell every registered client the daemon is going away
    fn broadcast_terminate(&self) {
        for name in self.registry.names() {
            let peer = client_socket_path(&self.config.runtime_dir, &name);
            let _ = self.endpoint.send_to(&ControlResponse::Terminate.encode(), &peer);
        }
    }

    fn resolve_user(uid: u32) -> String {
        User::from_uid(Uid::from_raw(uid))
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| uid.to_string())
    }
}
