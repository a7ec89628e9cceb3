//! Broker configuration

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    chunk::{required_segment_size, MempoolEntry},
    error::{HermodError, Result},
    memory::{AccessPolicy, SegmentConfig},
};

/// Configuration of one broker instance.
///
/// Loaded from a TOML file; every field has a default so a partial file or
/// no file at all yields a runnable broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Directory holding the broker and client control sockets
    pub runtime_dir: PathBuf,
    /// Shared-memory object name of the payload segment
    pub payload_segment: String,
    /// Shared-memory object name of the management segment
    pub management_segment: String,
    /// Size of the management segment (delivery-queue storage)
    pub management_size: usize,
    /// Permission bits for both segments
    pub segment_permissions: u32,
    /// Chunk size classes, strictly ascending payload sizes
    pub mempools: Vec<MempoolEntry>,
    /// How often the control loop wakes and the supervisor sweeps
    pub monitoring_interval_ms: u64,
    /// How long a monitored client may stay silent before it is reaped
    pub keepalive_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            runtime_dir: PathBuf::from("/tmp/hermod"),
            payload_segment: "/hermod_payload".to_string(),
            management_segment: "/hermod_mgmt".to_string(),
            management_size: 1024 * 1024,
            segment_permissions: 0o600,
            mempools: vec![
                MempoolEntry {
                    payload_size: 128,
                    chunk_count: 64,
                },
                MempoolEntry {
                    payload_size: 1024,
                    chunk_count: 32,
                },
                MempoolEntry {
                    payload_size: 16 * 1024,
                    chunk_count: 16,
                },
                MempoolEntry {
                    payload_size: 128 * 1024,
                    chunk_count: 8,
                },
            ],
            monitoring_interval_ms: 500,
            keepalive_timeout_ms: 3000,
        }
    }
}

impl BrokerConfig {
    /// Load a configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HermodError::from_io(e, "Failed to read config file"))?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.payload_segment_config().validate()?;
        self.management_segment_config().validate()?;

        if self.mempools.is_empty() {
            return Err(HermodError::config("at least one mempool is required"));
        }
        for window in self.mempools.windows(2) {
            if window[1].payload_size <= window[0].payload_size {
                return Err(HermodError::config(
                    "mempool payload sizes must be strictly ascending",
                ));
            }
        }
        for entry in &self.mempools {
            if entry.chunk_count == 0 {
                return Err(HermodError::config("mempool chunk count must not be 0"));
            }
        }

        if self.monitoring_interval_ms == 0 {
            return Err(HermodError::config("monitoring interval must not be 0"));
        }
        if self.keepalive_timeout_ms < self.monitoring_interval_ms {
            return Err(HermodError::config(
                "keepalive timeout must be at least the monitoring interval",
            ));
        }

        Ok(())
    }

    /// Segment config for the payload segment, sized for the mempool layout
    pub fn payload_segment_config(&self) -> SegmentConfig {
        let mut config = SegmentConfig::new(
            self.payload_segment.as_str(),
            required_segment_size(&self.mempools).max(1),
            AccessPolicy::PurgeAndCreate,
        );
        config.permissions = self.segment_permissions;
        config
    }

    /// Segment config for the management segment
    pub fn management_segment_config(&self) -> SegmentConfig {
        let mut config = SegmentConfig::new(
            self.management_segment.as_str(),
            self.management_size,
            AccessPolicy::PurgeAndCreate,
        );
        config.permissions = self.segment_permissions;
        config
    }

    /// Control-loop wakeup and sweep period
    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.monitoring_interval_ms)
    }

    /// Keepalive deadline for monitored clients
    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }
}
