//! Status tracking for one evaluation.
//!
//! ## Contents
//! - [`StatusTracker`] status worker, negotiation wait and completion wait
//! - [`TrackerState`]  `AwaitingNegotiation → Negotiated → AwaitingCompletion → Completed | Failed`

mod state;
mod status;

pub use state::TrackerState;
pub use status::StatusTracker;
