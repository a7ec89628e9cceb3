//! Segment map handed to clients at registration

use serde::{Deserialize, Serialize};

use super::segment::{Segment, SegmentId};

/// Access mode a client is granted on a mapped segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    /// Short wire form used in control messages
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "ro",
            AccessMode::ReadWrite => "rw",
        }
    }

    /// Parse the short wire form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ro" => Some(AccessMode::ReadOnly),
            "rw" => Some(AccessMode::ReadWrite),
            _ => None,
        }
    }
}

/// Describes one segment a client is permitted to map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMapping {
    pub segment_id: SegmentId,
    pub name: String,
    pub size: usize,
    pub mode: AccessMode,
}

impl SegmentMapping {
    /// Describe an existing segment with the given client access mode
    pub fn describe(segment: &Segment, mode: AccessMode) -> Self {
        Self {
            segment_id: segment.id(),
            name: segment.name().to_string(),
            size: segment.size(),
            mode,
        }
    }
}

/// The full set of segments a client may map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMap {
    mappings: Vec<SegmentMapping>,
}

impl SegmentMap {
    /// Create an empty segment map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping
    pub fn push(&mut self, mapping: SegmentMapping) {
        self.mappings.push(mapping);
    }

    /// Iterate over the mappings
    pub fn iter(&self) -> impl Iterator<Item = &SegmentMapping> {
        self.mappings.iter()
    }

    /// Number of mappings
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Look up a mapping by segment id
    pub fn get(&self, segment_id: SegmentId) -> Option<&SegmentMapping> {
        self.mappings.iter().find(|m| m.segment_id == segment_id)
    }
}
