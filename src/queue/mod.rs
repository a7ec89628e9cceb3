//! Per-connection delivery queues

pub mod arena;
pub mod delivery;

pub use arena::QueueArena;
pub use delivery::{DeliveryQueue, QueueHeader, QUEUE_MAGIC};

use serde::{Deserialize, Serialize};

/// What a full queue does with a new entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueuePolicy {
    /// Evict the oldest unread entry and accept the new one
    DropOldest,
    /// Reject the push; the publisher observes backpressure
    Block,
}

impl QueuePolicy {
    pub(crate) fn as_u32(&self) -> u32 {
        match self {
            QueuePolicy::DropOldest => 0,
            QueuePolicy::Block => 1,
        }
    }

    pub(crate) fn from_u32(value: u32) -> Self {
        match value {
            1 => QueuePolicy::Block,
            _ => QueuePolicy::DropOldest,
        }
    }

    /// Short wire form used in control messages
    pub fn as_str(&self) -> &'static str {
        match self {
            QueuePolicy::DropOldest => "drop-oldest",
            QueuePolicy::Block => "block",
        }
    }

    /// Parse the short wire form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "drop-oldest" => Some(QueuePolicy::DropOldest),
            "block" => Some(QueuePolicy::Block),
            _ => None,
        }
    }
}
