//! The broker daemon: config, control loop, liveness supervision

pub mod broker;
pub mod config;
pub mod supervisor;

pub use broker::{Broker, MANAGEMENT_SEGMENT_ID, PAYLOAD_SEGMENT_ID};
pub use config::BrokerConfig;
pub use supervisor::{ProcessReaper, Supervisor};
