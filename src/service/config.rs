//! Service configuration

use std::path::PathBuf;

use crate::error::Result;
use crate::memory::{BackingType, RegionConfig};
use crate::stream::TuningConfig;

/// When exclusive (dedicated device buffer) streams are granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExclusivePolicy {
    /// Every stream goes through a shared endpoint
    Never,
    /// Exclusive for low-latency requests when the device allows it,
    /// otherwise fall back to shared
    #[default]
    Auto,
    /// Exclusive requests are granted or fail; no fallback
    Always,
}

/// Configuration for an [`AudioService`](super::AudioService)
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Buffer sizing knobs
    pub tuning: TuningConfig,
    /// Exclusive stream policy
    pub exclusive_policy: ExclusivePolicy,
    /// Backing for FIFO and queue regions
    pub backing_type: BackingType,
    /// Directory for file-backed regions
    pub region_directory: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tuning: TuningConfig::default(),
            exclusive_policy: ExclusivePolicy::default(),
            backing_type: BackingType::default(),
            region_directory: None,
        }
    }
}

impl ServiceConfig {
    /// Defaults with tuning taken from the environment
    pub fn from_env() -> Self {
        Self {
            tuning: TuningConfig::from_env(),
            ..Self::default()
        }
    }

    pub fn with_tuning(mut self, tuning: TuningConfig) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_exclusive_policy(mut self, policy: ExclusivePolicy) -> Self {
        self.exclusive_policy = policy;
        self
    }

    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    pub fn with_region_directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.region_directory = Some(directory.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.tuning.validate()
    }

    /// Region config for a new FIFO or queue. The size is filled in by the
    /// allocator.
    pub fn region_config(&self, name: impl Into<String>) -> RegionConfig {
        let config = RegionConfig::new(name, 0).with_backing_type(self.backing_type);
        match &self.region_directory {
            Some(dir) => config.with_directory(dir.clone()),
            None => config,
        }
    }
}
