//! # Hermod - Zero-Copy Inter-Process Pub/Sub Broker
//!
//! Hermod is a single-host publish/subscribe middleware. Publishers
//! allocate message chunks directly out of shared memory; subscribers
//! receive references to those chunks without any copy. A central daemon
//! owns the shared-memory segments, matches publishers to subscribers by
//! service identifier, and supervises process liveness.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 Broker Daemon                   │
//! ├─────────────────────────────────────────────────┤
//! │  Process Registry │ Port Manager │ Segments     │
//! │  - session ids    │ - matching   │ - chunk pools│
//! │  - liveness sweep │ - queues     │ - queue arena│
//! └─────────────────────────────────────────────────┘
//!          │ control channel (unix datagrams)
//!          ▼
//! ┌─────────────────┐    ┌─────────────────────────┐
//! │    Publisher    │───▶│       Subscriber        │
//! │  loan + publish │shm │      take (zero-copy)   │
//! └─────────────────┘    └─────────────────────────┘
//! ```
//!
//! The data path never traverses the daemon: a publisher allocates a chunk
//! from a lock-free pool, writes the payload in place, and enqueues the
//! chunk offset into each matched subscriber's SPSC delivery queue. Only
//! setup, teardown, and keepalive flow through the control channel.

// Core modules
pub mod channel;
pub mod chunk;
pub mod daemon;
pub mod error;
pub mod memory;
pub mod port;
pub mod queue;
pub mod registry;

// Main API re-exports
pub use channel::{ChannelEndpoint, ControlRequest, ControlResponse};
pub use chunk::{ChunkAllocator, ChunkHeader, ChunkRef, MempoolEntry};
pub use daemon::{Broker, BrokerConfig};
pub use error::{HermodError, Result, SegmentError};
pub use memory::{AccessMode, AccessPolicy, Segment, SegmentConfig, SegmentId, SegmentMap};
pub use port::{MatchEvent, PortManager, PublisherPort, Sample, ServiceId, SubscriberPort};
pub use queue::{DeliveryQueue, QueueArena, QueuePolicy};
pub use registry::{ProcessRecord, ProcessRegistry};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration constants
pub mod config {
    /// Default runtime directory for control sockets
    pub const DEFAULT_RUNTIME_DIR: &str = "/tmp/hermod";

    /// Default alignment for pool carving within the payload segment
    pub const DEFAULT_ALIGNMENT: usize = 64;

    /// Default delivery-queue capacity for subscribers that do not choose
    pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

    /// Default history capacity for publishers that do not choose
    pub const DEFAULT_HISTORY_CAPACITY: usize = 0;
}
