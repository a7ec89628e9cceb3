//! Segment configuration types

use serde::{Deserialize, Serialize};

use crate::error::{HermodError, Result, SegmentError};

/// Maximum length of a shared-memory object name, including the leading
/// slash (platform NAME_MAX)
pub const SEGMENT_NAME_MAX: usize = 255;

/// How a segment's backing object is created or attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessPolicy {
    /// Open an existing object; fail if absent
    Open,
    /// Create the object; fail if present
    ExclusiveCreate,
    /// Create the object; on EEXIST fall back to opening it as non-owner
    CreateOrOpen,
    /// Unlink any previous object (ignoring ENOENT), then exclusive-create
    PurgeAndCreate,
}

impl AccessPolicy {
    /// Whether a successful create under this policy takes ownership of the
    /// backing object (the owner unlinks on destruction)
    pub fn takes_ownership(&self) -> bool {
        !matches!(self, AccessPolicy::Open)
    }
}

/// Configuration for a shared memory segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Absolute shared-memory object name, beginning with `/`
    pub name: String,
    /// Size of the segment in bytes
    pub size: usize,
    /// Creation/attachment policy
    pub policy: AccessPolicy,
    /// Permission bits applied verbatim at creation (umask is cleared)
    pub permissions: u32,
    /// Group permitted to map the segment read-only
    pub reader_group: String,
    /// Group permitted to map the segment read-write
    pub writer_group: String,
}

impl SegmentConfig {
    /// Create a config with the default broker groups and permissions
    pub fn new(name: impl Into<String>, size: usize, policy: AccessPolicy) -> Self {
        Self {
            name: name.into(),
            size,
            policy,
            permissions: 0o600,
            reader_group: String::new(),
            writer_group: String::new(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(HermodError::segment(&self.name, SegmentError::EmptyName));
        }

        if !self.name.starts_with('/') {
            return Err(HermodError::segment(
                &self.name,
                SegmentError::NameWithoutLeadingSlash,
            ));
        }

        if self.name.len() > SEGMENT_NAME_MAX {
            return Err(HermodError::invalid_parameter(
                "name",
                format!(
                    "segment name exceeds maximum length of {} bytes",
                    SEGMENT_NAME_MAX
                ),
            ));
        }

        if self.name[1..].contains('/') {
            return Err(HermodError::invalid_parameter(
                "name",
                "segment name may contain only the leading slash",
            ));
        }

        if self.size == 0 {
            return Err(HermodError::invalid_parameter(
                "size",
                "segment size must be greater than 0",
            ));
        }

        // Offsets into a segment are stored as 32-bit words in queue slots
        // and chunk references
        if self.size > u32::MAX as usize {
            return Err(HermodError::invalid_parameter(
                "size",
                "segment size must fit in 32 bits",
            ));
        }

        Ok(())
    }
}
