//! Port manager: tables, matching, queue installation, teardown

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use log::{debug, info};

use crate::{
    chunk::ChunkAllocator,
    error::{HermodError, Result},
    queue::{DeliveryQueue, QueueArena, QueuePolicy},
};

use super::{
    publisher::PublisherPort,
    service::ServiceId,
    subscriber::{SubscriberPort, SubscriptionState},
};

/// A matching change the daemon routes to the affected clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    Matched {
        service: ServiceId,
        publisher_owner: String,
        subscriber_owner: String,
    },
    Unmatched {
        service: ServiceId,
        publisher_owner: String,
        subscriber_owner: String,
    },
}

#[derive(Debug, Default)]
struct PortTables {
    publishers: HashMap<u64, Arc<PublisherPort>>,
    subscribers: HashMap<u64, Arc<SubscriberPort>>,
}

/// Owns every live port and the matching relation between them.
///
/// Matching is exact equality on [`ServiceId`]. One delivery queue is
/// installed per (publisher, subscriber) pair, preserving SPSC on the data
/// path. A daemon-local mutex protects the tables; the data path never
/// takes it.
#[derive(Debug)]
pub struct PortManager {
    allocator: Arc<ChunkAllocator>,
    arena: Arc<QueueArena>,
    tables: Mutex<PortTables>,
    next_port_id: AtomicU64,
}

impl PortManager {
    /// Create a port manager over the payload allocator and queue arena
    pub fn new(allocator: Arc<ChunkAllocator>, arena: Arc<QueueArena>) -> Self {
        Self {
            allocator,
            arena,
            tables: Mutex::new(PortTables::default()),
            next_port_id: AtomicU64::new(1),
        }
    }

    /// Create a publisher port in `not-offered` state
    pub fn create_publisher(
        &self,
        owner: &str,
        service: ServiceId,
        history_capacity: usize,
    ) -> Arc<PublisherPort> {
        let port_id = self.next_port_id.fetch_add(1, Ordering::Relaxed);
        let port = Arc::new(PublisherPort::new(
            port_id,
            service,
            owner.to_string(),
            history_capacity,
            Arc::clone(&self.allocator),
        ));

        self.tables
            .lock()
            .unwrap()
            .publishers
            .insert(port_id, Arc::clone(&port));

        debug!(
            "created publisher port {} for {} on {}",
            port_id,
            owner,
            port.service()
        );
        port
    }

    /// Create a subscriber port; matches immediately against every offered
    /// publisher with the same service
    pub fn create_subscriber(
        &self,
        owner: &str,
        service: ServiceId,
        queue_capacity: usize,
        policy: QueuePolicy,
    ) -> Result<(Arc<SubscriberPort>, Vec<MatchEvent>)> {
        let port_id = self.next_port_id.fetch_add(1, Ordering::Relaxed);
        let port = Arc::new(SubscriberPort::new(
            port_id,
            service,
            owner.to_string(),
            queue_capacity,
            policy,
            Arc::clone(&self.allocator),
        ));

        let mut tables = self.tables.lock().unwrap();
        tables.subscribers.insert(port_id, Arc::clone(&port));

        let mut events = Vec::new();
        let offered: Vec<_> = tables
            .publishers
            .values()
            .filter(|p| p.is_offered() && p.service() == port.service())
            .cloned()
            .collect();
        for publisher in offered {
            self.connect(&publisher, &port)?;
            events.push(MatchEvent::Matched {
                service: port.service().clone(),
                publisher_owner: publisher.owner().to_string(),
                subscriber_owner: owner.to_string(),
            });
        }

        debug!(
            "created subscriber port {} for {} on {} ({} match(es))",
            port_id,
            owner,
            port.service(),
            events.len()
        );
        Ok((port, events))
    }

    /// Offer a publisher port: matches against every waiting subscriber
    /// with the same service
    pub fn offer(&self, owner: &str, port_id: u64) -> Result<Vec<MatchEvent>> {
        let tables = self.tables.lock().unwrap();
        let publisher = Self::owned_publisher(&tables, owner, port_id)?;

        if publisher.is_offered() {
            return Ok(Vec::new());
        }
        publisher.set_offered(true);

        let mut events = Vec::new();
        let mut waiting: Vec<_> = tables
            .subscribers
            .values()
            .filter(|s| {
                s.service() == publisher.service()
                    && s.state() != SubscriptionState::Unsubscribed
                    && !publisher.is_matched_to(s.port_id())
            })
            .cloned()
            .collect();
        // port ids are monotonic, so ascending order is registration order
        waiting.sort_by_key(|s| s.port_id());
        for subscriber in waiting {
            self.connect(&publisher, &subscriber)?;
            events.push(MatchEvent::Matched {
                service: publisher.service().clone(),
                publisher_owner: owner.to_string(),
                subscriber_owner: subscriber.owner().to_string(),
            });
        }

        info!(
            "publisher {} offered {} ({} match(es))",
            port_id,
            publisher.service(),
            events.len()
        );
        Ok(events)
    }

    /// Stop offering: drains the fan-out, every matched subscriber reverts
    /// to `wait-for-offer` and its queue is cleared. Chunk references held
    /// by consumers persist.
    pub fn stop_offer(&self, owner: &str, port_id: u64) -> Result<Vec<MatchEvent>> {
        let tables = self.tables.lock().unwrap();
        let publisher = Self::owned_publisher(&tables, owner, port_id)?;

        if !publisher.is_offered() {
            return Ok(Vec::new());
        }
        publisher.set_offered(false);

        let mut events = Vec::new();
        for entry in publisher.drain_fanout() {
            if let Some(subscriber) = tables.subscribers.get(&entry.subscriber_id) {
                subscriber.remove_queue(port_id)?;
                events.push(MatchEvent::Unmatched {
                    service: publisher.service().clone(),
                    publisher_owner: owner.to_string(),
                    subscriber_owner: subscriber.owner().to_string(),
                });
            }
        }

        info!("publisher {} stopped offering {}", port_id, publisher.service());
        Ok(events)
    }

    /// Destroy a publisher port: stop-offer semantics plus release of the
    /// port's history and unpublished loans
    pub fn destroy_publisher(&self, owner: &str, port_id: u64) -> Result<Vec<MatchEvent>> {
        let events = self.stop_offer(owner, port_id)?;

        let publisher = {
            let mut tables = self.tables.lock().unwrap();
            tables
                .publishers
                .remove(&port_id)
                .ok_or_else(|| HermodError::unknown_port(port_id))?
        };
        publisher.release_held_chunks()?;

        debug!("destroyed publisher port {}", port_id);
        Ok(events)
    }

    /// Destroy a subscriber port: detaches from every matched publisher and
    /// releases unread chunks
    pub fn destroy_subscriber(&self, owner: &str, port_id: u64) -> Result<Vec<MatchEvent>> {
        let mut tables = self.tables.lock().unwrap();
        let subscriber = Self::owned_subscriber(&tables, owner, port_id)?;

        let mut events = Vec::new();
        for publisher_id in subscriber.matched_publisher_ids() {
            if let Some(publisher) = tables.publishers.get(&publisher_id) {
                publisher.remove_queue(port_id);
                events.push(MatchEvent::Unmatched {
                    service: subscriber.service().clone(),
                    publisher_owner: publisher.owner().to_string(),
                    subscriber_owner: owner.to_string(),
                });
            }
        }
        subscriber.clear_queues(SubscriptionState::Unsubscribed)?;
        tables.subscribers.remove(&port_id);

        debug!("destroyed subscriber port {}", port_id);
        Ok(events)
    }

    /// Destroy every port owned by a process; used by explicit deregister
    /// and by the liveness sweep
    pub fn destroy_process_ports(&self, owner: &str) -> Result<Vec<MatchEvent>> {
        let (publisher_ids, subscriber_ids) = {
            let tables = self.tables.lock().unwrap();
            (
                tables
                    .publishers
                    .values()
                    .filter(|p| p.owner() == owner)
                    .map(|p| p.port_id())
                    .collect::<Vec<_>>(),
                tables
                    .subscribers
                    .values()
                    .filter(|s| s.owner() == owner)
                    .map(|s| s.port_id())
                    .collect::<Vec<_>>(),
            )
        };

        let mut events = Vec::new();
        for port_id in publisher_ids {
            events.extend(self.destroy_publisher(owner, port_id)?);
        }
        for port_id in subscriber_ids {
            events.extend(self.destroy_subscriber(owner, port_id)?);
        }

        if !events.is_empty() {
            info!("tore down {} matching(s) owned by {}", events.len(), owner);
        }
        Ok(events)
    }

    /// Look up a publisher port
    pub fn publisher(&self, port_id: u64) -> Option<Arc<PublisherPort>> {
        self.tables.lock().unwrap().publishers.get(&port_id).cloned()
    }

    /// Look up a subscriber port
    pub fn subscriber(&self, port_id: u64) -> Option<Arc<SubscriberPort>> {
        self.tables
            .lock()
            .unwrap()
            .subscribers
            .get(&port_id)
            .cloned()
    }

    /// Number of live publisher ports
    pub fn publisher_count(&self) -> usize {
        self.tables.lock().unwrap().publishers.len()
    }

    /// Number of live subscriber ports
    pub fn subscriber_count(&self) -> usize {
        self.tables.lock().unwrap().subscribers.len()
    }

    /// Install the delivery queue for one (publisher, subscriber) pair
    fn connect(
        &self,
        publisher: &Arc<PublisherPort>,
        subscriber: &Arc<SubscriberPort>,
    ) -> Result<()> {
        let size = DeliveryQueue::required_size(subscriber.queue_capacity());
        let offset = self.arena.alloc(size)?;
        let queue = unsafe {
            DeliveryQueue::init_at(
                self.arena.ptr_at(offset),
                subscriber.queue_capacity(),
                subscriber.policy(),
            )?
        };

        publisher.connect_queue(subscriber.port_id(), queue)?;
        subscriber.install_queue(publisher.port_id(), queue);
        Ok(())
    }

    fn owned_publisher(
        tables: &PortTables,
        owner: &str,
        port_id: u64,
    ) -> Result<Arc<PublisherPort>> {
        let port = tables
            .publishers
            .get(&port_id)
            .ok_or_else(|| HermodError::unknown_port(port_id))?;
        if port.owner() != owner {
            return Err(HermodError::port_state(format!(
                "port {} is not owned by {}",
                port_id, owner
            )));
        }
        Ok(Arc::clone(port))
    }

    fn owned_subscriber(
        tables: &PortTables,
        owner: &str,
        port_id: u64,
    ) -> Result<Arc<SubscriberPort>> {
        let port = tables
            .subscribers
            .get(&port_id)
            .ok_or_else(|| HermodError::unknown_port(port_id))?;
        if port.owner() != owner {
            return Err(HermodError::port_state(format!(
                "port {} is not owned by {}",
                port_id, owner
            )));
        }
        Ok(Arc::clone(port))
    }
}
