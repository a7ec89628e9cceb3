//! Subscriber port and the zero-copy sample handle

use std::sync::{Arc, Mutex};

use crate::{
    chunk::{ChunkAllocator, ChunkRef},
    error::Result,
    queue::{DeliveryQueue, QueuePolicy},
};

use super::service::ServiceId;

/// Lifecycle state of a subscriber port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No matching offered publisher yet
    WaitForOffer,
    /// At least one delivery queue is installed
    Subscribed,
    /// Explicitly unsubscribed; the port is being destroyed
    Unsubscribed,
}

/// One installed delivery queue from a matched publisher
#[derive(Debug, Clone, Copy)]
pub(super) struct InboundQueue {
    pub publisher_id: u64,
    pub queue: DeliveryQueue,
}

#[derive(Debug)]
struct SubscriberInner {
    state: SubscriptionState,
    /// One queue per matched publisher, in match order
    queues: Vec<InboundQueue>,
}

/// A subscriber endpoint owned by a client process
#[derive(Debug)]
pub struct SubscriberPort {
    port_id: u64,
    service: ServiceId,
    owner: String,
    queue_capacity: usize,
    policy: QueuePolicy,
    inner: Mutex<SubscriberInner>,
    allocator: Arc<ChunkAllocator>,
}

impl SubscriberPort {
    pub(super) fn new(
        port_id: u64,
        service: ServiceId,
        owner: String,
        queue_capacity: usize,
        policy: QueuePolicy,
        allocator: Arc<ChunkAllocator>,
    ) -> Self {
        Self {
            port_id,
            service,
            owner,
            queue_capacity,
            policy,
            inner: Mutex::new(SubscriberInner {
                state: SubscriptionState::WaitForOffer,
                queues: Vec::new(),
            }),
            allocator,
        }
    }

    /// Port identifier
    pub fn port_id(&self) -> u64 {
        self.port_id
    }

    /// Service this port subscribes to
    pub fn service(&self) -> &ServiceId {
        &self.service
    }

    /// Name of the owning process
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Capacity of each installed delivery queue
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Overflow policy of this port's queues
    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Current lifecycle state
    pub fn state(&self) -> SubscriptionState {
        self.inner.lock().unwrap().state
    }

    /// Take the next delivered chunk, if any.
    ///
    /// With several matched publishers the queues are drained in match
    /// order; ordering across publishers is the consumer's drain strategy,
    /// per-publisher FIFO is preserved within each queue.
    pub fn take(&self) -> Result<Option<Sample>> {
        let inner = self.inner.lock().unwrap();
        for inbound in &inner.queues {
            if let Some(chunk) = inbound.queue.pop() {
                return Ok(Some(Sample {
                    chunk,
                    allocator: Arc::clone(&self.allocator),
                }));
            }
        }
        Ok(None)
    }

    /// Total unread entries across all installed queues
    pub fn pending(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.queues.iter().map(|q| q.queue.len()).sum()
    }

    // --- port-manager internal surface ---

    pub(super) fn install_queue(&self, publisher_id: u64, queue: DeliveryQueue) {
        let mut inner = self.inner.lock().unwrap();
        inner.queues.push(InboundQueue {
            publisher_id,
            queue,
        });
        inner.state = SubscriptionState::Subscribed;
    }

    /// Remove the queue from the given publisher, releasing every unread
    /// chunk it still holds
    pub(super) fn remove_queue(&self, publisher_id: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(position) = inner
            .queues
            .iter()
            .position(|q| q.publisher_id == publisher_id)
        {
            let inbound = inner.queues.remove(position);
            for chunk in inbound.queue.drain() {
                self.allocator.release(chunk)?;
            }
        }
        if inner.queues.is_empty() && inner.state == SubscriptionState::Subscribed {
            inner.state = SubscriptionState::WaitForOffer;
        }
        Ok(())
    }

    /// Drop every queue and release all unread chunks
    pub(super) fn clear_queues(&self, final_state: SubscriptionState) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for inbound in inner.queues.drain(..) {
            for chunk in inbound.queue.drain() {
                self.allocator.release(chunk)?;
            }
        }
        inner.state = final_state;
        Ok(())
    }

    pub(super) fn matched_publisher_ids(&self) -> Vec<u64> {
        self.inner
            .lock()
            .unwrap()
            .queues
            .iter()
            .map(|q| q.publisher_id)
            .collect()
    }
}

/// A delivered chunk borrowed by the consumer.
///
/// Dropping the sample releases the reference; the chunk returns to its
/// origin pool once the last holder is gone.
#[derive(Debug)]
pub struct Sample {
    chunk: ChunkRef,
    allocator: Arc<ChunkAllocator>,
}

impl Sample {
    /// The underlying chunk reference
    pub fn chunk(&self) -> ChunkRef {
        self.chunk
    }

    /// Borrow the payload bytes
    pub fn payload(&self) -> Result<&[u8]> {
        self.allocator.payload(self.chunk)
    }

    /// Sequence number stamped by the publisher
    pub fn sequence(&self) -> Result<u64> {
        Ok(self.allocator.header(self.chunk)?.sequence_number)
    }

    /// Port that published the chunk
    pub fn originator(&self) -> Result<u64> {
        Ok(self.allocator.header(self.chunk)?.originator_port_id)
    }
}

impl Drop for Sample {
    fn drop(&mut self) {
        let _ = self.allocator.release(self.chunk);
    }
}
