//! Control record layout and decoding

use bytemuck::{Pod, Zeroable};

use crate::clock::Timestamp;
use crate::error::{AudioError, Result};

/// Record kind: timestamp of the device side of the FIFO
pub const WHAT_TIMESTAMP_SERVICE: u32 = 1;
/// Record kind: timestamp reported by the hardware
pub const WHAT_TIMESTAMP_HARDWARE: u32 = 2;
/// Record kind: stream event
pub const WHAT_EVENT: u32 = 3;

/// Fixed 32-byte record as stored in the queue region
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct RawMessage {
    /// Record kind (`WHAT_*`)
    pub what: u32,
    /// Event code for `WHAT_EVENT` records
    pub event: u32,
    /// Event payload (volume gain)
    pub value: f64,
    /// Frame position or event payload
    pub data: i64,
    /// Monotonic time in nanoseconds
    pub time: i64,
}

/// Stream events published by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Started,
    Paused,
    Stopped,
    Flushed,
    Closed,
    Disconnected,
    Volume,
    Xrun,
}

impl EventKind {
    /// Code stored in the `event` field
    pub fn code(self) -> u32 {
        match self {
            EventKind::Started => 1,
            EventKind::Paused => 2,
            EventKind::Stopped => 3,
            EventKind::Flushed => 4,
            EventKind::Closed => 5,
            EventKind::Disconnected => 6,
            EventKind::Volume => 7,
            EventKind::Xrun => 8,
        }
    }

    /// Decode an `event` field
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => EventKind::Started,
            2 => EventKind::Paused,
            3 => EventKind::Stopped,
            4 => EventKind::Flushed,
            5 => EventKind::Closed,
            6 => EventKind::Disconnected,
            7 => EventKind::Volume,
            8 => EventKind::Xrun,
            _ => return None,
        })
    }
}

/// A decoded control message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMessage {
    Event { kind: EventKind, value: f64, data: i64 },
    ServiceTimestamp(Timestamp),
    HardwareTimestamp(Timestamp),
}

impl ControlMessage {
    /// Event without payload
    pub fn event(kind: EventKind) -> Self {
        ControlMessage::Event {
            kind,
            value: 0.0,
            data: 0,
        }
    }

    /// `Closed` and `Disconnected`, the events after which the stream
    /// sends nothing else
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControlMessage::Event {
                kind: EventKind::Closed | EventKind::Disconnected,
                ..
            }
        )
    }

    /// Encode for the queue region
    pub fn to_raw(&self) -> RawMessage {
        match *self {
            ControlMessage::Event { kind, value, data } => RawMessage {
                what: WHAT_EVENT,
                event: kind.code(),
                value,
                data,
                time: 0,
            },
            ControlMessage::ServiceTimestamp(ts) => RawMessage {
                what: WHAT_TIMESTAMP_SERVICE,
                data: ts.position,
                time: ts.nanos,
                ..RawMessage::zeroed()
            },
            ControlMessage::HardwareTimestamp(ts) => RawMessage {
                what: WHAT_TIMESTAMP_HARDWARE,
                data: ts.position,
                time: ts.nanos,
                ..RawMessage::zeroed()
            },
        }
    }

    /// Decode a record. Unknown kinds are a protocol violation.
    pub fn from_raw(raw: &RawMessage) -> Result<Self> {
        match raw.what {
            WHAT_TIMESTAMP_SERVICE => Ok(ControlMessage::ServiceTimestamp(Timestamp::new(raw.data, raw.time))),
            WHAT_TIMESTAMP_HARDWARE => Ok(ControlMessage::HardwareTimestamp(Timestamp::new(raw.data, raw.time))),
            WHAT_EVENT => {
                let kind = EventKind::from_code(raw.event).ok_or_else(|| {
                    AudioError::internal(format!("Unrecognized event code {}", raw.event))
                })?;
                Ok(ControlMessage::Event {
                    kind,
                    value: raw.value,
                    data: raw.data,
                })
            }
            other => Err(AudioError::internal(format!("Unrecognized message kind {}", other))),
        }
    }
}
