//! Consumer side.
//!
//! ## Contents
//! - [`ConsumerProcess`]  long-lived process demultiplexing many evaluations
//! - [`ConsumerFactory`]  capability interface of the host's output writers
//! - [`StatisticsConsumer`] / [`GroupedConsumer`] and their closure wrappers
//! - [`Resources`]  paths or URIs written, reported on completion
//! - [`GroupAggregator`]  one-shot accumulator for grouped statistics
//! - [`ExpectedCounts`] / [`ConsumerProgress`] / [`EvaluationOutcome`] bookkeeping

mod aggregator;
mod consumer;
mod evaluation;
mod process;
mod progress;

pub use aggregator::{AggregateFn, GroupAggregator};
pub use consumer::{
    ConsumerFactory, ConsumerFn, GroupedConsumer, GroupedConsumerFn, Resources, SharedConsumers,
    StatisticsConsumer,
};
pub use process::ConsumerProcess;
pub use progress::{ConsumerProgress, EvaluationOutcome, ExpectedCounts};
