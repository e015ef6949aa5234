//! How FIFO and queue regions are backed

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AudioError, Result};

/// Storage behind a shared region. Either way the peer only ever sees a
/// descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingType {
    /// Unlinked file in a directory (tmpfs in practice)
    FileBacked,
    /// Anonymous `memfd`
    #[cfg(target_os = "linux")]
    MemFd,
}

impl Default for BackingType {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        return Self::MemFd;
        #[cfg(not(target_os = "linux"))]
        return Self::FileBacked;
    }
}

impl fmt::Display for BackingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackingType::FileBacked => f.write_str("file"),
            #[cfg(target_os = "linux")]
            BackingType::MemFd => f.write_str("memfd"),
        }
    }
}

/// Parameters for one region. `size` is usually left at zero and filled in
/// by the FIFO that owns the region.
#[derive(Debug, Clone)]
pub struct RegionConfig {
    pub name: String,
    pub size: usize,
    pub backing_type: BackingType,
    /// Where file-backed regions are created; the system temp dir if unset
    pub directory: Option<PathBuf>,
    /// Mode of the short-lived backing file
    pub permissions: u32,
}

impl RegionConfig {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            backing_type: BackingType::default(),
            directory: None,
            permissions: 0o600,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(AudioError::illegal_argument("name", "Region name cannot be empty"));
        }
        if self.size == 0 {
            return Err(AudioError::illegal_argument("size", "Region size must be greater than 0"));
        }
        Ok(())
    }

    /// Backing file for a file-backed region. The pid keeps concurrent
    /// services from colliding on the same name.
    pub fn file_path(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("audiopipe-{}-{}", std::process::id(), self.name))
    }
}
