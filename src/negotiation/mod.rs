//! Consumer negotiation.
//!
//! ## Contents
//! - [`ConsumerOffer`]     one consumer's capability declaration
//! - [`Approver`]          allow-list collaborator ([`ApproveAll`], [`AllowList`], closures)
//! - [`OfferBook`]         synchronous negotiation state and greedy assignment
//! - [`negotiate`]         async negotiation over a stream of offers
//! - [`NegotiationResult`] immutable format → consumer map
//!
//! ## Tie-break policy
//! When two offers cover the same number of still-unassigned formats, the offer received
//! first wins. Assignment is deterministic for a given arrival order.

mod approver;
mod book;
mod negotiate;
mod offer;

pub use approver::{AllowList, ApproveAll, Approver};
pub use book::{OfferBook, OfferOutcome};
pub use negotiate::negotiate;
pub use offer::{ConsumerOffer, NegotiationResult};
