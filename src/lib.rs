//! # evalbus
//!
//! **evalbus** distributes the output of one long-running evaluation to an a-priori-unknown
//! set of independent consumer processes, each able to write a subset of output formats.
//!
//! Which consumers are alive and which formats they deliver is negotiated at runtime. The
//! negotiation runs alongside progress tracking, flow control and retryable consumption.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  EvaluationPublisher                     transport                  ConsumerProcess (× N)
//! ┌──────────────────────┐          ┌────────────────────┐          ┌────────────────────────┐
//! │ start()              │─────────►│ Status             │◄────────►│ status worker          │
//! │  └ StatusTracker     │◄─────────│  CONSUMER_REQUIRED │          │  └ offer once          │
//! │     ├ OfferBook      │          │  READY_TO_CONSUME  │          │                        │
//! │     ├ DeadlineLatch  │          │  ...               │          │ evaluation worker      │
//! │     └ FlowController │          │                    │          │  └ addressed to me?    │
//! │ publish()            │─────────►│ Evaluation         │─────────►│                        │
//! │ mark_*_complete()    │─────────►│ Statistics         │─────────►│ statistics worker      │
//! │ await_completion()   │          │ Pairs              │          │  ├ StatisticsConsumer  │
//! └──────────────────────┘          └────────────────────┘          │  └ GroupAggregator     │
//!                                                                   └────────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! Created ──start()──► Starting ──negotiated──► Publishing
//!                          │                        │ publish() / publish_pairs()
//!                          │                        │ mark_group_publication_complete_..(g)
//!                          │                        └─mark_publication_complete_..()──► PublicationComplete
//!                          │                                                              │
//!                          └── negotiation failed ──► Stopped ◄── stop(cause) ─── await_completion()
//!                                                                                         │
//!                                                        0 = every consumer completed ◄───┤
//!                                                        1 = stopped locally          ◄───┤
//!                                                        Err = consumer failed / timeout ◄┘
//! ```
//!
//! ## Features
//! | Area              | Description                                                       | Key types / traits                                 |
//! |-------------------|-------------------------------------------------------------------|----------------------------------------------------|
//! | **Publishing**    | Evaluation lifecycle and message-count bookkeeping.               | [`EvaluationPublisher`], [`PublisherBuilder`]      |
//! | **Negotiation**   | One consumer per format, greedy set cover over offers.            | [`negotiate`], [`OfferBook`], [`Approver`]         |
//! | **Tracking**      | Negotiation and completion status of one evaluation.              | [`StatusTracker`], [`TrackerState`]                |
//! | **Consuming**     | Long-lived process serving many evaluations with retries.         | [`ConsumerProcess`], [`ConsumerFactory`]           |
//! | **Aggregation**   | One-shot grouped consumption in arrival order.                    | [`GroupAggregator`], [`GroupedConsumer`]           |
//! | **Sync**          | Extendable deadlines and advisory backpressure.                   | [`DeadlineLatch`], [`FlowController`]              |
//! | **Transport**     | Broker boundary plus an in-process broker.                        | [`Transport`], [`LocalBroker`], [`TransportContext`] |
//! | **Errors**        | Typed errors split into recoverable and fatal kinds.              | [`EvaluationError`], [`ConsumerError`]             |
//! | **Configuration** | Timeouts, retry budget and flow marks.                            | [`Config`], [`RetryPolicy`]                        |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use evalbus::{
//!     Config, ConsumerDescription, ConsumerError, ConsumerFn, ConsumerId, ConsumerProcess,
//!     EvaluationDescription, EvaluationPublisher, Format, SharedConsumers, Statistics,
//!     TransportContext,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.consumer_required_interval = Duration::from_millis(50);
//!     config.negotiation_window = Duration::ZERO;
//!     let ctx = TransportContext::local(config);
//!
//!     // A consumer process that writes CSV.
//!     let writer = ConsumerFn::arc(|stats: Statistics| async move {
//!         let _row: Vec<f64> = stats.decode().map_err(|e| ConsumerError::fatal(e.to_string()))?;
//!         Ok::<_, ConsumerError>(())
//!     });
//!     let me = ConsumerDescription::new(ConsumerId::new("csv-writer"), [Format::Csv]);
//!     let consumers = ConsumerProcess::start(Arc::new(SharedConsumers::new(me, writer)), ctx.clone()).await?;
//!
//!     // A publisher that needs CSV output.
//!     let publisher = EvaluationPublisher::builder(ctx, EvaluationDescription::new([Format::Csv]))
//!         .build()
//!         .await?;
//!     publisher.start().await?;
//!     publisher.publish(&vec![1.0, 2.5], None).await?;
//!     publisher.mark_publication_complete_reported_success().await?;
//!     assert_eq!(publisher.await_completion().await?, 0);
//!
//!     publisher.close().await;
//!     consumers.shutdown().await;
//!     Ok(())
//! }
//! ```
mod config;
mod consume;
mod error;
mod message;
mod negotiation;
mod policies;
mod publish;
mod sync;
mod tracker;
mod transport;

// ---- Public re-exports ----

pub use config::Config;
pub use consume::{
    AggregateFn, ConsumerFactory, ConsumerFn, ConsumerProcess, ConsumerProgress, EvaluationOutcome,
    ExpectedCounts, GroupAggregator, GroupedConsumer, GroupedConsumerFn, Resources,
    SharedConsumers, StatisticsConsumer,
};
pub use error::{
    AggregatorError, ConsumerError, CountMismatch, EvaluationError, NegotiationError, TransportError,
};
pub use message::{
    CONSUMER_ID, CORRELATION_ID, Channel, CompletionStatus, ConsumerDescription, ConsumerId,
    Envelope, EvaluationDescription, EvaluationId, EvaluationStatus, Format, GROUP_ID, GroupId,
    MESSAGE_ID, ParseFormatError, Properties, Statistics, codec,
};
pub use negotiation::{
    AllowList, ApproveAll, Approver, ConsumerOffer, NegotiationResult, OfferBook, OfferOutcome,
    negotiate,
};
pub use policies::{BackoffPolicy, JitterPolicy, RetryPolicy};
pub use publish::{EvaluationPublisher, PublicationCounts, PublisherBuilder, PublisherPhase};
pub use sync::{DeadlineLatch, FlowController};
pub use tracker::{StatusTracker, TrackerState};
pub use transport::{Filter, LocalBroker, Subscription, Transport, TransportContext};
