//! Lock-free single-producer single-consumer frame FIFO in shared memory
//!
//! The region layout is `[write_counter:u32][read_counter:u32][frames...]`.
//! The producer and consumer may live in different processes; they only
//! coordinate through the two counters (acquire/release).

pub mod buffer;
pub mod position;


pub use buffer::{FifoBuffer, FIFO_HEADER_SIZE};
pub use position::PositionTracker;
