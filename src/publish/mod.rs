//! Publisher side of an evaluation.
//!
//! ## Contents
//! - [`EvaluationPublisher`] lifecycle owner: start, publish, mark complete, await, close
//! - [`PublisherBuilder`]    description, client id, evaluation id and approver
//! - [`PublisherPhase`]      lifecycle phase
//! - [`PublicationCounts`]   messages sent so far

mod builder;
mod publisher;

pub use builder::PublisherBuilder;
pub use publisher::{EvaluationPublisher, PublicationCounts, PublisherPhase};
