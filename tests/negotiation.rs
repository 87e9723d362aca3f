mod common;

use std::time::Duration;

use evalbus::{
    AllowList, ConsumerId, EvaluationDescription, EvaluationOutcome, EvaluationPublisher, Format,
    TransportContext,
};

use common::{config, consumer_process, describe, recording, settle};

fn windowed() -> TransportContext {
    let mut config = config();
    config.negotiation_window = Duration::from_millis(100);
    TransportContext::local(config)
}

#[tokio::test(start_paused = true)]
async fn test_consumer_covering_both_formats_wins() {
    common::init_tracing();
    let ctx = windowed();
    let (a_seen, a) = recording();
    let (b_seen, b) = recording();
    let (c_seen, c) = recording();
    let pa = consumer_process(&ctx, describe("A", [Format::Png]), a).await;
    let pb = consumer_process(&ctx, describe("B", [Format::Csv]), b).await;
    let pc = consumer_process(&ctx, describe("C", [Format::Png, Format::Csv]), c).await;

    let publisher =
        EvaluationPublisher::builder(ctx, EvaluationDescription::new([Format::Png, Format::Csv]))
            .build()
            .await
            .unwrap();
    let negotiated = publisher.start().await.unwrap();
    assert_eq!(negotiated.get(Format::Png), Some(&ConsumerId::new("C")));
    assert_eq!(negotiated.get(Format::Csv), Some(&ConsumerId::new("C")));
    assert_eq!(negotiated.consumers().len(), 1);

    publisher.publish(&9_u32, None).await.unwrap();
    publisher.mark_publication_complete_reported_success().await.unwrap();
    assert_eq!(publisher.await_completion().await.unwrap(), 0);

    settle().await;
    let id = publisher.evaluation_id();
    assert_eq!(pa.evaluation_outcome(id).await, Some(EvaluationOutcome::Declined));
    assert_eq!(pb.evaluation_outcome(id).await, Some(EvaluationOutcome::Declined));
    assert_eq!(pc.evaluation_outcome(id).await, Some(EvaluationOutcome::Completed));
    assert!(a_seen.lock().unwrap().is_empty());
    assert!(b_seen.lock().unwrap().is_empty());
    assert_eq!(*c_seen.lock().unwrap(), vec![9]);

    publisher.close().await;
    for process in [pa, pb, pc] {
        process.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_approver_limits_assignment() {
    let ctx = windowed();
    let (_a_seen, a) = recording();
    let (_b_seen, b) = recording();
    let (c_seen, c) = recording();
    let pa = consumer_process(&ctx, describe("A", [Format::Png]), a).await;
    let pb = consumer_process(&ctx, describe("B", [Format::Csv]), b).await;
    let pc = consumer_process(&ctx, describe("C", [Format::Png, Format::Csv]), c).await;

    let approver = AllowList::new().allow(Format::Png, [ConsumerId::new("A")]);
    let publisher =
        EvaluationPublisher::builder(ctx, EvaluationDescription::new([Format::Png, Format::Csv]))
            .with_approver(approver)
            .build()
            .await
            .unwrap();
    let negotiated = publisher.start().await.unwrap();
    assert_eq!(negotiated.get(Format::Png), Some(&ConsumerId::new("A")));
    assert_ne!(negotiated.get(Format::Csv), None);

    publisher.publish(&1_u32, None).await.unwrap();
    publisher.mark_publication_complete_reported_success().await.unwrap();
    assert_eq!(publisher.await_completion().await.unwrap(), 0);

    let csv_owner = negotiated.get(Format::Csv).cloned();
    if csv_owner == Some(ConsumerId::new("C")) {
        assert_eq!(*c_seen.lock().unwrap(), vec![1]);
    } else {
        assert!(c_seen.lock().unwrap().is_empty());
    }

    publisher.close().await;
    for process in [pa, pb, pc] {
        process.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_late_process_still_gets_asked() {
    let ctx = TransportContext::local(config());
    let publisher = EvaluationPublisher::builder(ctx.clone(), EvaluationDescription::new([Format::Netcdf]))
        .build()
        .await
        .unwrap();

    let starting = tokio::spawn(async move {
        let negotiated = publisher.start().await.map(|n| n.get(Format::Netcdf).cloned());
        (publisher, negotiated)
    });

    // Joins after the first announcement; the periodic one reaches it.
    tokio::time::sleep(Duration::from_millis(120)).await;
    let (_seen, consumer) = recording();
    let process = consumer_process(&ctx, describe("grid", [Format::Netcdf]), consumer).await;

    let (publisher, negotiated) = starting.await.unwrap();
    assert_eq!(negotiated.unwrap(), Some(ConsumerId::new("grid")));

    publisher.mark_publication_complete_reported_success().await.unwrap();
    assert_eq!(publisher.await_completion().await.unwrap(), 0);
    publisher.close().await;
    process.shutdown().await;
}
