use std::collections::BTreeSet;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use super::{Approver, ConsumerOffer, NegotiationResult, OfferBook, OfferOutcome};
use crate::error::NegotiationError;
use crate::message::Format;

/// Assigns one approved consumer to every required format.
///
/// Offers are read from `offers` until every format is covered, then for `window` longer so a
/// consumer covering more formats can still take part; the assignment is computed once over
/// everything collected (see [`OfferBook`]). Offers arriving after that are never read.
///
/// Fails with [`NegotiationError::Timeout`] if coverage is not reached within `timeout`, or
/// [`NegotiationError::StreamEnded`] if the stream ends first. An empty `required` set
/// negotiates immediately.
pub async fn negotiate<S>(
    required: &BTreeSet<Format>,
    offers: S,
    approver: &dyn Approver,
    timeout: Duration,
    window: Duration,
) -> Result<NegotiationResult, NegotiationError>
where
    S: Stream<Item = ConsumerOffer>,
{
    let mut book = OfferBook::new(required.iter().copied());
    if let Some(result) = book.close() {
        return Ok(result.clone());
    }

    let mut offers = std::pin::pin!(offers);
    let deadline = Instant::now() + timeout;

    loop {
        tokio::select! {
            offer = offers.next() => match offer {
                Some(offer) => {
                    let outcome = book.register(&offer, approver);
                    debug!(target: "evalbus.negotiation", consumer_id = %offer.consumer_id, ?outcome, "offer");
                    if outcome == OfferOutcome::Covered {
                        break;
                    }
                }
                None => return Err(NegotiationError::StreamEnded { missing: book.missing() }),
            },
            _ = sleep_until(deadline) => {
                return Err(NegotiationError::Timeout { timeout, missing: book.missing() });
            }
        }
    }

    let window_end = Instant::now() + window;
    loop {
        tokio::select! {
            offer = offers.next() => match offer {
                Some(offer) => {
                    let outcome = book.register(&offer, approver);
                    debug!(target: "evalbus.negotiation", consumer_id = %offer.consumer_id, ?outcome, "offer in window");
                }
                None => break,
            },
            _ = sleep_until(window_end) => break,
        }
    }

    book.close()
        .cloned()
        .ok_or_else(|| NegotiationError::StreamEnded { missing: book.missing() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ConsumerId;
    use crate::negotiation::{AllowList, ApproveAll};
    use futures::stream;

    fn offer(id: &str, formats: &[Format]) -> ConsumerOffer {
        ConsumerOffer::new(ConsumerId::new(id), formats.iter().copied())
    }

    fn required(formats: &[Format]) -> BTreeSet<Format> {
        formats.iter().copied().collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefers_single_offer_covering_both() {
        let offers = stream::iter(vec![
            offer("A", &[Format::Png]),
            offer("B", &[Format::Csv]),
            offer("C", &[Format::Png, Format::Csv]),
        ]);
        let result = negotiate(
            &required(&[Format::Png, Format::Csv]),
            offers,
            &ApproveAll,
            Duration::from_secs(5),
            Duration::from_millis(100),
        )
        .await
        .unwrap();

        assert_eq!(result.get(Format::Png).map(|c| c.as_str()), Some("C"));
        assert_eq!(result.get(Format::Csv).map(|c| c.as_str()), Some("C"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_covers_required_with_approved_consumers() {
        let approver = AllowList::new().allow(Format::Netcdf, [ConsumerId::new("grid")]);
        let offers = stream::iter(vec![
            offer("tab", &[Format::Csv, Format::Netcdf]),
            offer("grid", &[Format::Netcdf]),
            offer("img", &[Format::Png, Format::Svg]),
        ]);
        let needed = required(&[Format::Csv, Format::Netcdf, Format::Png]);
        let result = negotiate(
            &needed,
            offers,
            &approver,
            Duration::from_secs(5),
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(result.formats(), needed);
        for (format, consumer) in result.iter() {
            assert!(approver.is_approved(format, consumer));
        }
        assert_eq!(result.get(Format::Netcdf).map(|c| c.as_str()), Some("grid"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsatisfiable_format_times_out() {
        let offers = stream::iter(vec![offer("a", &[Format::Png])]).chain(stream::pending());
        let err = negotiate(
            &required(&[Format::Png, Format::Netcdf]),
            offers,
            &ApproveAll,
            Duration::from_secs(30),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err,
            NegotiationError::Timeout {
                timeout: Duration::from_secs(30),
                missing: vec![Format::Netcdf],
            }
        );
    }

    #[tokio::test]
    async fn test_stream_end_before_coverage() {
        let err = negotiate(
            &required(&[Format::Csv]),
            stream::empty(),
            &ApproveAll,
            Duration::from_secs(1),
            Duration::ZERO,
        )
        .await
        .unwrap_err();
        assert_eq!(err.as_label(), "negotiation_stream_ended");
    }

    #[tokio::test]
    async fn test_empty_requirement() {
        let result = negotiate(
            &BTreeSet::new(),
            stream::pending(),
            &ApproveAll,
            Duration::from_secs(1),
            Duration::ZERO,
        )
        .await
        .unwrap();
        assert!(result.is_empty());
    }
}
