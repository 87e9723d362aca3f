//! # Consumer capability interface.
//!
//! A host process plugs its output writers into a [`ConsumerProcess`](crate::ConsumerProcess)
//! through [`ConsumerFactory`]:
//!
//! ```text
//! ConsumerFactory
//!   ├─► consumer_description()         who am I, which formats can I write
//!   ├─► create_consumer(id, desc)      StatisticsConsumer, one per evaluation
//!   └─► create_grouped_consumer(..)    GroupedConsumer, optional
//! ```
//!
//! Closures can be used directly via [`ConsumerFn`] and [`GroupedConsumerFn`].
//!
//! ## Rules
//! - Return [`ConsumerError::Recoverable`] for failures worth retrying, anything else is final.
//! - Panics are caught and treated as fatal errors.
//! - Every call reports the [`Resources`] it wrote; they reach the publisher with the
//!   consumer's terminal status.

use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::ConsumerError;
use crate::message::{ConsumerDescription, EvaluationDescription, EvaluationId, GroupId, Statistics};

/// Paths or URIs of the resources a consumer wrote.
///
/// `()` converts into an empty set, so consumers that write nothing reportable return `Ok(())`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resources(BTreeSet<String>);

impl Resources {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding one resource.
    pub fn single(resource: impl Into<String>) -> Self {
        Self(BTreeSet::from([resource.into()]))
    }

    /// Adds a resource; false if it was already present.
    pub fn insert(&mut self, resource: impl Into<String>) -> bool {
        self.0.insert(resource.into())
    }

    /// Moves every resource of `other` into this set.
    pub fn merge(&mut self, mut other: Resources) {
        self.0.append(&mut other.0);
    }

    /// True if nothing was written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct resources.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Resources in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<()> for Resources {
    fn from((): ()) -> Self {
        Self::default()
    }
}

impl From<BTreeSet<String>> for Resources {
    fn from(set: BTreeSet<String>) -> Self {
        Self(set)
    }
}

impl<S: Into<String>> From<Vec<S>> for Resources {
    fn from(items: Vec<S>) -> Self {
        items.into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for Resources {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for Resources {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Consumes statistics one at a time.
#[async_trait]
pub trait StatisticsConsumer: Send + Sync + 'static {
    /// Writes one statistics message and returns the resources it wrote.
    async fn accept(&self, statistics: &Statistics) -> Result<Resources, ConsumerError>;
}

/// Consumes a whole group of statistics at once.
#[async_trait]
pub trait GroupedConsumer: Send + Sync + 'static {
    /// Writes every statistics message of one group, given in arrival order.
    async fn accept_group(&self, group_id: &GroupId, statistics: &[Statistics]) -> Result<Resources, ConsumerError>;
}

/// Creates per-evaluation consumers for a [`ConsumerProcess`](crate::ConsumerProcess).
pub trait ConsumerFactory: Send + Sync + 'static {
    /// Identity and formats of this consumer.
    fn consumer_description(&self) -> ConsumerDescription;

    /// Consumer for an evaluation this process was negotiated for.
    fn create_consumer(
        &self,
        evaluation_id: &EvaluationId,
        description: &EvaluationDescription,
    ) -> Result<Arc<dyn StatisticsConsumer>, ConsumerError>;

    /// Grouped consumer, if grouped statistics should be aggregated.
    ///
    /// Without one, grouped statistics are consumed one by one like ungrouped ones.
    fn create_grouped_consumer(
        &self,
        _evaluation_id: &EvaluationId,
        _description: &EvaluationDescription,
    ) -> Option<Arc<dyn GroupedConsumer>> {
        None
    }
}

/// Closure-backed [`StatisticsConsumer`].
///
/// The closure may return anything convertible into [`Resources`], `()` included.
///
/// # Example
/// ```
/// use evalbus::{ConsumerError, ConsumerFn, Statistics, StatisticsConsumer};
///
/// let consumer = ConsumerFn::arc(|stats: Statistics| async move {
///     let _values: Vec<f64> = stats.decode().map_err(|e| ConsumerError::fatal(e.to_string()))?;
///     Ok::<_, ConsumerError>(())
/// });
/// let _shared: std::sync::Arc<dyn StatisticsConsumer> = consumer;
/// ```
pub struct ConsumerFn<F> {
    f: F,
}

impl<F, Fut, R> ConsumerFn<F>
where
    F: Fn(Statistics) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ConsumerError>> + Send + 'static,
    R: Into<Resources>,
{
    /// Wraps a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps a closure and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut, R> StatisticsConsumer for ConsumerFn<F>
where
    F: Fn(Statistics) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ConsumerError>> + Send + 'static,
    R: Into<Resources>,
{
    async fn accept(&self, statistics: &Statistics) -> Result<Resources, ConsumerError> {
        (self.f)(statistics.clone()).await.map(Into::into)
    }
}

/// Closure-backed [`GroupedConsumer`].
pub struct GroupedConsumerFn<F> {
    f: F,
}

impl<F, Fut, R> GroupedConsumerFn<F>
where
    F: Fn(GroupId, Vec<Statistics>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ConsumerError>> + Send + 'static,
    R: Into<Resources>,
{
    /// Wraps a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps a closure and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut, R> GroupedConsumer for GroupedConsumerFn<F>
where
    F: Fn(GroupId, Vec<Statistics>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ConsumerError>> + Send + 'static,
    R: Into<Resources>,
{
    async fn accept_group(&self, group_id: &GroupId, statistics: &[Statistics]) -> Result<Resources, ConsumerError> {
        (self.f)(group_id.clone(), statistics.to_vec()).await.map(Into::into)
    }
}

/// Factory handing the same consumers to every evaluation.
#[derive(Clone)]
pub struct SharedConsumers {
    description: ConsumerDescription,
    consumer: Arc<dyn StatisticsConsumer>,
    grouped: Option<Arc<dyn GroupedConsumer>>,
}

impl SharedConsumers {
    /// Creates a factory around one statistics consumer.
    pub fn new(description: ConsumerDescription, consumer: Arc<dyn StatisticsConsumer>) -> Self {
        Self {
            description,
            consumer,
            grouped: None,
        }
    }

    /// Adds a grouped consumer.
    pub fn with_grouped(mut self, grouped: Arc<dyn GroupedConsumer>) -> Self {
        self.grouped = Some(grouped);
        self
    }
}

impl ConsumerFactory for SharedConsumers {
    fn consumer_description(&self) -> ConsumerDescription {
        self.description.clone()
    }

    fn create_consumer(
        &self,
        _evaluation_id: &EvaluationId,
        _description: &EvaluationDescription,
    ) -> Result<Arc<dyn StatisticsConsumer>, ConsumerError> {
        Ok(self.consumer.clone())
    }

    fn create_grouped_consumer(
        &self,
        _evaluation_id: &EvaluationId,
        _description: &EvaluationDescription,
    ) -> Option<Arc<dyn GroupedConsumer>> {
        self.grouped.clone()
    }
}

impl std::fmt::Debug for SharedConsumers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConsumers")
            .field("description", &self.description)
            .field("grouped", &self.grouped.is_some())
            .finish_non_exhaustive()
    }
}

/// Runs consumer code, turning a panic into [`ConsumerError::Fatal`].
pub(crate) async fn guarded<Fut, T>(fut: Fut) -> Result<T, ConsumerError>
where
    Fut: Future<Output = Result<T, ConsumerError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let any = &*panic;
            let message = if let Some(s) = any.downcast_ref::<&'static str>() {
                (*s).to_string()
            } else if let Some(s) = any.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(ConsumerError::fatal(format!("consumer panicked: {message}")))
        }
    }
}
