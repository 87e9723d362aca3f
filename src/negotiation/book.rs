//! # Offer book: negotiation state for one evaluation.
//!
//! Offers are registered in arrival order. The book tracks which required formats are
//! covered by at least one approved offer, and on [`OfferBook::close`] computes the
//! assignment once, by greedy set-cover:
//!
//! ```text
//! remaining = required
//! while remaining not empty:
//!     best = first offer (arrival order) covering the most formats of `remaining`
//!     assign those formats to best; remove them from remaining
//! ```
//!
//! ## Rules
//! - An offer only counts for formats that are required **and** approved for its consumer.
//! - Ignored: not ready, blank consumer id, second offer from the same consumer, offers
//!   approved for no required format, anything after close.
//! - Ties on coverage go to the earlier offer.
//! - A format assigned in an earlier round is never reassigned.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::{Approver, ConsumerOffer, NegotiationResult};
use crate::message::{ConsumerId, Format};

/// What [`OfferBook::register`] did with an offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Recorded; some required format is still uncovered.
    Accepted,
    /// Recorded; every required format is now covered.
    Covered,
    /// Offer not marked ready.
    NotReady,
    /// Blank consumer id.
    Blank,
    /// This consumer already offered.
    Duplicate,
    /// Not approved for any required format.
    Unapproved,
    /// The book is closed.
    Closed,
}

impl OfferOutcome {
    /// True if the offer was recorded.
    pub fn is_accepted(&self) -> bool {
        matches!(self, OfferOutcome::Accepted | OfferOutcome::Covered)
    }
}

#[derive(Debug)]
struct ApprovedOffer {
    consumer_id: ConsumerId,
    formats: BTreeSet<Format>,
}

/// Negotiation state: required formats plus the offers received so far.
#[derive(Debug)]
pub struct OfferBook {
    required: BTreeSet<Format>,
    offers: Vec<ApprovedOffer>,
    seen: HashSet<ConsumerId>,
    covered: BTreeSet<Format>,
    result: Option<NegotiationResult>,
}

impl OfferBook {
    /// Creates a book for the given required formats.
    pub fn new(required: impl IntoIterator<Item = Format>) -> Self {
        Self {
            required: required.into_iter().collect(),
            offers: Vec::new(),
            seen: HashSet::new(),
            covered: BTreeSet::new(),
            result: None,
        }
    }

    /// Required formats.
    pub fn required(&self) -> &BTreeSet<Format> {
        &self.required
    }

    /// Records an offer.
    pub fn register(&mut self, offer: &ConsumerOffer, approver: &dyn Approver) -> OfferOutcome {
        if self.result.is_some() {
            return OfferOutcome::Closed;
        }
        if !offer.ready {
            return OfferOutcome::NotReady;
        }
        if offer.consumer_id.is_blank() {
            return OfferOutcome::Blank;
        }
        if self.seen.contains(&offer.consumer_id) {
            return OfferOutcome::Duplicate;
        }

        let formats: BTreeSet<Format> = offer
            .formats
            .iter()
            .copied()
            .filter(|f| self.required.contains(f) && approver.is_approved(*f, &offer.consumer_id))
            .collect();
        if formats.is_empty() {
            return OfferOutcome::Unapproved;
        }

        self.seen.insert(offer.consumer_id.clone());
        self.covered.extend(formats.iter().copied());
        self.offers.push(ApprovedOffer {
            consumer_id: offer.consumer_id.clone(),
            formats,
        });

        if self.is_covered() {
            OfferOutcome::Covered
        } else {
            OfferOutcome::Accepted
        }
    }

    /// True when every required format has at least one approved offer.
    pub fn is_covered(&self) -> bool {
        self.required.is_subset(&self.covered)
    }

    /// Required formats with no approved offer yet.
    pub fn missing(&self) -> Vec<Format> {
        self.required.difference(&self.covered).copied().collect()
    }

    /// Number of recorded offers.
    pub fn offer_count(&self) -> usize {
        self.offers.len()
    }

    /// Computes the assignment and closes the book.
    ///
    /// Returns `None` (and stays open) while some format is uncovered. Calling again after
    /// a successful close returns the same result.
    pub fn close(&mut self) -> Option<&NegotiationResult> {
        if self.result.is_none() {
            if !self.is_covered() {
                return None;
            }
            self.result = Some(assign(&self.required, &self.offers));
        }
        self.result.as_ref()
    }

    /// The assignment, once closed.
    pub fn result(&self) -> Option<&NegotiationResult> {
        self.result.as_ref()
    }

    /// True after a successful [`OfferBook::close`].
    pub fn is_closed(&self) -> bool {
        self.result.is_some()
    }
}

fn assign(required: &BTreeSet<Format>, offers: &[ApprovedOffer]) -> NegotiationResult {
    let mut remaining = required.clone();
    let mut assignments = BTreeMap::new();

    while !remaining.is_empty() {
        let mut best: Option<(&ApprovedOffer, usize)> = None;
        for offer in offers {
            let gain = offer.formats.intersection(&remaining).count();
            // Strictly greater: ties keep the earlier offer.
            if gain > best.map_or(0, |(_, g)| g) {
                best = Some((offer, gain));
            }
        }
        let Some((offer, _)) = best else {
            break;
        };
        for format in offer.formats.intersection(&remaining).copied().collect::<Vec<_>>() {
            assignments.insert(format, offer.consumer_id.clone());
            remaining.remove(&format);
        }
    }

    NegotiationResult::new(assignments)
}
