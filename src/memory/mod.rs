//! Shared-memory segments and the per-client segment map

pub mod config;
pub mod map;
pub mod segment;

pub use config::{AccessPolicy, SegmentConfig, SEGMENT_NAME_MAX};
pub use map::{AccessMode, SegmentMap, SegmentMapping};
pub use segment::{Segment, SegmentId};
