//! Service-to-client control messages
//!
//! The service reports every settled state change, timestamps and xruns
//! through a fixed-depth queue living in its own shared region. The client
//! drains it whenever it checks its state; nothing ever blocks on it.

pub mod queue;
pub mod record;

pub use queue::{ControlQueue, MESSAGE_QUEUE_DEPTH};
pub use record::{ControlMessage, EventKind, RawMessage};
