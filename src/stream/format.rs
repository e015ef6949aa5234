//! Sample formats and stream modes

use std::fmt;

use serde::{Deserialize, Serialize};

/// PCM sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AudioFormat {
    /// Let the service choose
    #[default]
    Unspecified,
    I16,
    F32,
}

impl AudioFormat {
    /// Size of one sample in bytes (0 when unspecified)
    pub fn bytes_per_sample(self) -> usize {
        match self {
            AudioFormat::Unspecified => 0,
            AudioFormat::I16 => 2,
            AudioFormat::F32 => 4,
        }
    }

    pub fn is_specified(self) -> bool {
        self != AudioFormat::Unspecified
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioFormat::Unspecified => "unspecified",
            AudioFormat::I16 => "i16",
            AudioFormat::F32 => "f32",
        };
        f.write_str(name)
    }
}

/// Data flow relative to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Application writes, device plays
    #[default]
    Output,
    /// Device captures, application reads
    Input,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Output => "output",
            Direction::Input => "input",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SharingMode {
    /// Sole owner of the device buffer
    Exclusive,
    /// Mixed with other streams on a shared endpoint
    #[default]
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PerformanceMode {
    #[default]
    None,
    PowerSaving,
    LowLatency,
}

/// Sample types that can be transferred to and from a stream
pub trait Sample: bytemuck::Pod + Default + Send + 'static {
    const FORMAT: AudioFormat;
}

impl Sample for i16 {
    const FORMAT: AudioFormat = AudioFormat::I16;
}

impl Sample for f32 {
    const FORMAT: AudioFormat = AudioFormat::F32;
}
