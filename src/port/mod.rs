//! Ports and the publisher/subscriber matching layer

pub mod manager;
pub mod publisher;
pub mod service;
pub mod subscriber;

pub use manager::{MatchEvent, PortManager};
pub use publisher::{FanoutEntry, PublisherPort};
pub use service::{ServiceId, SERVICE_COMPONENT_MAX};
pub use subscriber::{Sample, SubscriberPort, SubscriptionState};
