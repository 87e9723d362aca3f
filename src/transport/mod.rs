//! Transport boundary.
//!
//! ## Contents
//! - [`Transport`]        broker collaborator trait (`publish` / `subscribe`)
//! - [`Filter`]           evaluation / group selector for subscriptions
//! - [`Subscription`]     stream of delivered envelopes
//! - [`LocalBroker`]      in-process broadcast implementation
//! - [`TransportContext`] transport + config passed into constructors

mod context;
mod local;
#[allow(clippy::module_inception)]
mod transport;

pub use context::TransportContext;
pub use local::LocalBroker;
pub use transport::{Filter, Subscription, Transport};
