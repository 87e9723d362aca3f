//! # One-shot group aggregator.
//!
//! ```text
//! Open(items) ──accept(item)──► Open(items + item)
//!      │
//!      └──accept_group()──► Used { size }     (aggregation runs once, even if it fails)
//!
//! Used ──accept / accept_group──► Err(AggregatorError::Reused)
//! ```
//!
//! Items reach the aggregation function in arrival order. Retrying a failed aggregation is the
//! aggregation function's own business; `accept_group` never runs twice.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::Resources;
use crate::error::{AggregatorError, ConsumerError};
use crate::message::GroupId;

/// Aggregation function: receives the group id and every accepted item.
pub type AggregateFn<T> =
    Arc<dyn Fn(GroupId, Vec<T>) -> BoxFuture<'static, Result<Resources, ConsumerError>> + Send + Sync>;

enum State<T> {
    Open(Vec<T>),
    Used { size: usize },
}

/// Single-use accumulator for the items of one group.
pub struct GroupAggregator<T> {
    group_id: GroupId,
    state: State<T>,
    aggregate: AggregateFn<T>,
}

impl<T: Send + 'static> GroupAggregator<T> {
    /// Creates an open aggregator.
    pub fn new(group_id: GroupId, aggregate: AggregateFn<T>) -> Self {
        Self {
            group_id,
            state: State::Open(Vec::new()),
            aggregate,
        }
    }

    /// Creates an open aggregator from an async closure.
    ///
    /// # Example
    /// ```
    /// use evalbus::{ConsumerError, GroupAggregator, GroupId};
    ///
    /// # tokio_test_block(async {
    /// let mut agg = GroupAggregator::from_fn(GroupId::new("g1"), |_group, items: Vec<u32>| async move {
    ///     assert_eq!(items, vec![1, 2]);
    ///     Ok::<_, ConsumerError>(())
    /// });
    /// agg.accept(1).unwrap();
    /// agg.accept(2).unwrap();
    /// agg.accept_group().await.unwrap();
    /// assert!(agg.accept(3).is_err());
    /// # });
    /// # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
    /// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
    /// # }
    /// ```
    pub fn from_fn<F, Fut, R>(group_id: GroupId, f: F) -> Self
    where
        F: Fn(GroupId, Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ConsumerError>> + Send + 'static,
        R: Into<Resources>,
    {
        let aggregate: AggregateFn<T> = Arc::new(
            move |group: GroupId, items: Vec<T>| -> BoxFuture<'static, Result<Resources, ConsumerError>> {
                let fut = f(group, items);
                Box::pin(async move { fut.await.map(Into::<Resources>::into) })
            },
        );
        Self::new(group_id, aggregate)
    }

    /// Buffers one item.
    pub fn accept(&mut self, item: T) -> Result<(), AggregatorError> {
        match &mut self.state {
            State::Open(items) => {
                items.push(item);
                Ok(())
            }
            State::Used { .. } => Err(self.reused()),
        }
    }

    /// Runs the aggregation function over every buffered item and marks the aggregator used.
    ///
    /// Returns the resources the aggregation wrote.
    pub async fn accept_group(&mut self) -> Result<Resources, AggregatorError> {
        let items = match std::mem::replace(&mut self.state, State::Used { size: 0 }) {
            State::Open(items) => items,
            used @ State::Used { .. } => {
                self.state = used;
                return Err(self.reused());
            }
        };
        self.state = State::Used { size: items.len() };

        (self.aggregate)(self.group_id.clone(), items)
            .await
            .map_err(|source| AggregatorError::Consumer {
                group_id: self.group_id.clone(),
                source,
            })
    }

    /// Number of items accepted.
    pub fn size(&self) -> usize {
        match &self.state {
            State::Open(items) => items.len(),
            State::Used { size } => *size,
        }
    }

    /// Group this aggregator collects.
    #[inline]
    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    /// True once [`GroupAggregator::accept_group`] ran.
    pub fn is_used(&self) -> bool {
        matches!(self.state, State::Used { .. })
    }

    fn reused(&self) -> AggregatorError {
        AggregatorError::Reused {
            group_id: self.group_id.clone(),
        }
    }
}

impl<T> std::fmt::Debug for GroupAggregator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (state, size) = match &self.state {
            State::Open(items) => ("open", items.len()),
            State::Used { size } => ("used", *size),
        };
        f.debug_struct("GroupAggregator")
            .field("group_id", &self.group_id)
            .field("state", &state)
            .field("size", &size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (Arc<Mutex<Vec<Vec<u32>>>>, GroupAggregator<u32>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let c = calls.clone();
        let agg = GroupAggregator::from_fn(GroupId::new("g1"), move |_, items| {
            c.lock().unwrap().push(items);
            async { Ok(()) }
        });
        (calls, agg)
    }

    #[tokio::test]
    async fn test_runs_once_in_arrival_order() {
        let (calls, mut agg) = recording();
        for item in [3, 1, 2] {
            agg.accept(item).unwrap();
        }
        assert_eq!(agg.size(), 3);
        agg.accept_group().await.unwrap();

        assert!(agg.is_used());
        assert_eq!(agg.size(), 3);
        assert_eq!(*calls.lock().unwrap(), vec![vec![3, 1, 2]]);
    }

    #[tokio::test]
    async fn test_second_accept_group_always_fails() {
        let (calls, mut agg) = recording();
        agg.accept_group().await.unwrap();
        let err = agg.accept_group().await.unwrap_err();
        assert_eq!(err.as_label(), "aggregator_reused");
        assert!(agg.accept(1).is_err());
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(agg.group_id().as_str(), "g1");
    }

    #[tokio::test]
    async fn test_failed_aggregation_still_uses_the_aggregator() {
        let mut agg: GroupAggregator<u32> = GroupAggregator::from_fn(GroupId::new("g2"), |_, _| async {
            Err::<(), _>(ConsumerError::fatal("write failed"))
        });
        agg.accept(7).unwrap();
        let err = agg.accept_group().await.unwrap_err();
        assert_eq!(err.as_label(), "aggregator_consumer_failed");
        assert!(agg.is_used());
        assert!(matches!(
            agg.accept_group().await,
            Err(AggregatorError::Reused { .. })
        ));
    }
}
