//! Synchronization primitives used by publishers and trackers.
//!
//! - [`DeadlineLatch`] countdown with a liveness-extendable deadline
//! - [`FlowController`] outstanding-message backpressure

mod flow;
mod latch;

pub use flow::FlowController;
pub use latch::DeadlineLatch;
