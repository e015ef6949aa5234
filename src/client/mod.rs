//! Application side of a stream
//!
//! [`StreamBuilder`] opens a [`ClientStream`] through a [`ServiceLink`],
//! either [`LocalServiceLink`] in the same process or the socket transport.

pub mod builder;
pub mod callback;
pub mod fixed_block;
pub mod link;
pub mod local;
pub mod stream;

pub use builder::StreamBuilder;
pub use callback::{CallbackResult, DataCallback, ErrorCallback, WorkerExit};
pub use fixed_block::{samples_mut, FixedBlockAdapter, FrameBuffer};
pub use link::{OpenedStream, ServiceLink};
pub use local::LocalServiceLink;
pub use stream::{calculate_reasonable_timeout, ClientStream};
