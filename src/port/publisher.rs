//! Publisher port: chunk loaning, fan-out delivery, history

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use crate::{
    chunk::{ChunkAllocator, ChunkRef},
    error::{HermodError, Result},
    queue::DeliveryQueue,
};

use super::service::ServiceId;

/// One installed delivery queue toward a matched subscriber
#[derive(Debug, Clone, Copy)]
pub struct FanoutEntry {
    pub subscriber_id: u64,
    pub queue: DeliveryQueue,
}

#[derive(Debug)]
struct PublisherInner {
    offered: bool,
    /// Queues in subscriber-registration order; fan-out follows this order
    fanout: Vec<FanoutEntry>,
    /// Most recent published chunks retained for late joiners, oldest first
    history: VecDeque<ChunkRef>,
    /// Chunks loaned out but not yet published
    loaned: Vec<ChunkRef>,
}

/// A publisher endpoint owned by a client process.
///
/// The daemon holds the port only as a lookup key; all mutation goes
/// through the port manager on behalf of the owning process.
#[derive(Debug)]
pub struct PublisherPort {
    port_id: u64,
    service: ServiceId,
    owner: String,
    history_capacity: usize,
    sequence: Mutex<u64>,
    inner: Mutex<PublisherInner>,
    allocator: Arc<ChunkAllocator>,
}

impl PublisherPort {
    pub(super) fn new(
        port_id: u64,
        service: ServiceId,
        owner: String,
        history_capacity: usize,
        allocator: Arc<ChunkAllocator>,
    ) -> Self {
        Self {
            port_id,
            service,
            owner,
            history_capacity,
            sequence: Mutex::new(0),
            inner: Mutex::new(PublisherInner {
                offered: false,
                fanout: Vec::new(),
                history: VecDeque::new(),
                loaned: Vec::new(),
            }),
            allocator,
        }
    }

    /// Port identifier
    pub fn port_id(&self) -> u64 {
        self.port_id
    }

    /// Service this port publishes
    pub fn service(&self) -> &ServiceId {
        &self.service
    }

    /// Name of the owning process
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Chunks retained for late joiners
    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    /// Whether the port is currently offered
    pub fn is_offered(&self) -> bool {
        self.inner.lock().unwrap().offered
    }

    /// Number of matched subscribers
    pub fn fanout_len(&self) -> usize {
        self.inner.lock().unwrap().fanout.len()
    }

    /// Loan a chunk for the next publish.
    ///
    /// The loan is tracked so a crashed publisher's unpublished chunks can
    /// be reclaimed by process teardown.
    pub fn loan(&self, payload_size: usize) -> Result<ChunkRef> {
        let chunk = self.allocator.acquire(payload_size)?;
        self.inner.lock().unwrap().loaned.push(chunk);
        Ok(chunk)
    }

    /// Borrow a loaned chunk's payload for writing
    pub fn payload_mut(&self, chunk: ChunkRef) -> Result<&mut [u8]> {
        self.allocator.payload_mut(chunk)
    }

    /// Publish a previously loaned chunk to every matched subscriber.
    ///
    /// Fan-out happens in subscriber-registration order. Queues under
    /// drop-oldest evict silently; queues under block policy that are full
    /// are skipped, and the publish reports them as `Blocked` after the
    /// remaining fan-out completed. Ownership of the loan passes to the
    /// port either way.
    pub fn publish(&self, chunk: ChunkRef) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        let position = inner
            .loaned
            .iter()
            .position(|c| *c == chunk)
            .ok_or_else(|| {
                HermodError::port_state(format!("chunk {} was not loaned from this port", chunk))
            })?;
        inner.loaned.swap_remove(position);

        let sequence = {
            let mut seq = self.sequence.lock().unwrap();
            *seq += 1;
            *seq
        };
        self.allocator.stamp(chunk, sequence, self.port_id)?;

        let mut missed = 0;
        for entry in &inner.fanout {
            self.allocator.retain(chunk)?;
            match entry.queue.push(chunk) {
                Ok(None) => {}
                Ok(Some(evicted)) => self.allocator.release(evicted)?,
                Err(HermodError::QueueFull) => {
                    self.allocator.release(chunk)?;
                    missed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        // Park the publisher's own reference in history, or drop it
        if self.history_capacity > 0 {
            inner.history.push_back(chunk);
            if inner.history.len() > self.history_capacity {
                let oldest = inner.history.pop_front().unwrap();
                self.allocator.release(oldest)?;
            }
        } else {
            self.allocator.release(chunk)?;
        }

        if missed > 0 {
            return Err(HermodError::Blocked { missed });
        }
        Ok(())
    }

    /// Current per-port sequence number
    pub fn sequence(&self) -> u64 {
        *self.sequence.lock().unwrap()
    }

    // --- port-manager internal surface ---

    pub(super) fn set_offered(&self, offered: bool) {
        self.inner.lock().unwrap().offered = offered;
    }

    /// Install a queue toward a newly matched subscriber.
    ///
    /// History is replayed (oldest first) into the queue before it joins
    /// the fan-out, under the same lock a publish takes, so the subscriber
    /// observes buffered history strictly before live traffic.
    pub(super) fn connect_queue(&self, subscriber_id: u64, queue: DeliveryQueue) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        for chunk in inner.history.iter().copied() {
            self.allocator.retain(chunk)?;
            match queue.push(chunk) {
                Ok(None) => {}
                Ok(Some(evicted)) => self.allocator.release(evicted)?,
                Err(HermodError::QueueFull) => self.allocator.release(chunk)?,
                Err(e) => return Err(e),
            }
        }

        inner.fanout.push(FanoutEntry {
            subscriber_id,
            queue,
        });
        Ok(())
    }

    pub(super) fn remove_queue(&self, subscriber_id: u64) -> Option<FanoutEntry> {
        let mut inner = self.inner.lock().unwrap();
        let position = inner
            .fanout
            .iter()
            .position(|e| e.subscriber_id == subscriber_id)?;
        Some(inner.fanout.remove(position))
    }

    pub(super) fn drain_fanout(&self) -> Vec<FanoutEntry> {
        std::mem::take(&mut self.inner.lock().unwrap().fanout)
    }

    pub(super) fn is_matched_to(&self, subscriber_id: u64) -> bool {
        self.inner
            .lock()
            .unwrap()
            .fanout
            .iter()
            .any(|e| e.subscriber_id == subscriber_id)
    }

    /// Release every reference the port still holds: history and
    /// unpublished loans. Consumer references keep their chunks alive.
    pub(super) fn release_held_chunks(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for chunk in inner.history.drain(..) {
            self.allocator.release(chunk)?;
        }
        for chunk in inner.loaned.drain(..) {
            self.allocator.release(chunk)?;
        }
        Ok(())
    }
}
