//! Lock-free publication primitives
//!
//! The audio path never takes a lock that a peer process could hold. Values
//! that a background producer updates and several readers sample (such as
//! the latest hardware timestamp) go through [`TwoSlotPublisher`].

pub mod two_slot;

pub use two_slot::TwoSlotPublisher;
