#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use evalbus::{
    BackoffPolicy, Config, ConsumerDescription, ConsumerError, ConsumerFn, ConsumerId, ConsumerProcess,
    Format, GroupId, GroupedConsumer, GroupedConsumerFn, RetryPolicy, SharedConsumers, Statistics,
    StatisticsConsumer, TransportContext,
};

/// Fast announcements, no negotiation window, two immediate retries.
pub fn config() -> Config {
    let mut config = Config::default();
    config.consumer_required_interval = Duration::from_millis(50);
    config.negotiation_window = Duration::ZERO;
    config.retry = RetryPolicy::new(2, BackoffPolicy::immediate());
    config
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub type Seen = Arc<Mutex<Vec<u32>>>;

/// Consumer recording every decoded value in call order.
pub fn recording() -> (Seen, Arc<dyn StatisticsConsumer>) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let consumer: Arc<dyn StatisticsConsumer> = ConsumerFn::arc(move |stats: Statistics| {
        let s = s.clone();
        async move {
            let value: u32 = stats.decode().map_err(|e| ConsumerError::fatal(e.to_string()))?;
            s.lock().unwrap().push(value);
            Ok::<_, ConsumerError>(())
        }
    });
    (seen, consumer)
}

pub type Groups = Arc<Mutex<Vec<(GroupId, Vec<u32>)>>>;

/// Grouped consumer recording every invocation.
pub fn grouped_recording() -> (Groups, Arc<dyn GroupedConsumer>) {
    let calls: Groups = Arc::new(Mutex::new(Vec::new()));
    let c = calls.clone();
    let grouped: Arc<dyn GroupedConsumer> = GroupedConsumerFn::arc(move |group: GroupId, items: Vec<Statistics>| {
        let c = c.clone();
        async move {
            let values = items
                .iter()
                .map(|s| s.decode::<u32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConsumerError::fatal(e.to_string()))?;
            c.lock().unwrap().push((group, values));
            Ok::<_, ConsumerError>(())
        }
    });
    (calls, grouped)
}

pub fn describe(id: &str, formats: impl IntoIterator<Item = Format>) -> ConsumerDescription {
    ConsumerDescription::new(ConsumerId::new(id), formats)
}

pub async fn consumer_process(
    ctx: &TransportContext,
    description: ConsumerDescription,
    consumer: Arc<dyn StatisticsConsumer>,
) -> ConsumerProcess {
    ConsumerProcess::start(Arc::new(SharedConsumers::new(description, consumer)), ctx.clone())
        .await
        .unwrap()
}

/// Lets every worker drain its queue (paused clock advances only when all tasks are idle).
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Like [`recording`], but every call takes `delay`.
pub fn slow_recording(delay: Duration) -> (Seen, Arc<dyn StatisticsConsumer>) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    let consumer: Arc<dyn StatisticsConsumer> = ConsumerFn::arc(move |stats: Statistics| {
        let s = s.clone();
        async move {
            tokio::time::sleep(delay).await;
            let value: u32 = stats.decode().map_err(|e| ConsumerError::fatal(e.to_string()))?;
            s.lock().unwrap().push(value);
            Ok::<_, ConsumerError>(())
        }
    });
    (seen, consumer)
}
