//! Message model shared by publishers and consumers.
//!
//! ## Contents
//! - ids: [`EvaluationId`], [`GroupId`], [`ConsumerId`]
//! - [`Format`] output formats
//! - [`EvaluationDescription`] static evaluation metadata
//! - [`EvaluationStatus`] / [`CompletionStatus`] status events
//! - [`Statistics`] consumer view of one statistics message
//! - [`Envelope`] / [`Properties`] / [`Channel`] what travels on the transport
//! - `codec` payload encoding

pub mod codec;
mod description;
mod envelope;
mod format;
mod ids;
mod statistics;
mod status;

pub use description::EvaluationDescription;
pub use envelope::{CONSUMER_ID, CORRELATION_ID, Channel, Envelope, GROUP_ID, MESSAGE_ID, Properties};
pub use format::{Format, ParseFormatError};
pub use ids::{ConsumerId, EvaluationId, GroupId};
pub use statistics::Statistics;
pub use status::{CompletionStatus, ConsumerDescription, EvaluationStatus};
