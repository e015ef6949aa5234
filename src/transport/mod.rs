//! Unix-domain socket transport between clients and the service
//!
//! Commands are synchronous request/reply pairs of bincode frames. The
//! shared regions of a new stream are passed as descriptors, so the data
//! path never touches the socket.

pub mod client;
pub mod frame;
pub mod protocol;
pub mod server;

pub use client::SocketServiceLink;
pub use protocol::{Reply, Request};
pub use server::{ListenerHandle, ServiceListener};
