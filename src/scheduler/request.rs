//! Request bookkeeping for the scheduler.

use futures_util::future::BoxFuture;
use std::any::Any;
use std::cmp::Reverse;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Boxed error returned by scheduled operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Marker error an operation returns when it observed cancellation.
///
/// Never retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Terminal failure of a scheduled request.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The request, its key, or the whole scheduler was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// Retries were exhausted or the policy forbade retrying.
    #[error("request failed: {0}")]
    Failed(#[source] BoxError),

    /// The scheduler task has shut down.
    #[error("scheduler closed")]
    Closed,
}

/// Result type for scheduled operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Admission priority. Higher priorities leave the queue first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// What to do when an operation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RetryPolicy {
    #[default]
    Retry,
    Discard,
}

/// Keys identify a logical operation slot.
pub trait RequestKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> RequestKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

pub(crate) type Erased = Box<dyn Any + Send>;
pub(crate) type Operation = Arc<dyn Fn() -> BoxFuture<'static, Result<Erased, BoxError>> + Send + Sync>;
pub(crate) type Completion = oneshot::Sender<Result<Erased, SchedulerError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RequestId(pub u64);

/// One attempt of a logical request.
pub(crate) struct Request<K> {
    pub id: RequestId,
    pub key: K,
    pub priority: Priority,
    pub policy: RetryPolicy,
    pub operation: Operation,
    /// Zero for the first execution.
    pub attempt: u32,
    pub enqueued_at: Instant,
    pub earliest_start: Instant,
    /// FIFO position within a priority.
    pub seq: u64,
    /// Promoted replacements sit ahead of everything else.
    pub promoted: bool,
    completion: Option<Completion>,
}

impl<K> Request<K> {
    pub fn new(
        key: K,
        priority: Priority,
        policy: RetryPolicy,
        operation: Operation,
        completion: Option<Completion>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: RequestId(0),
            key,
            priority,
            policy,
            operation,
            attempt: 0,
            enqueued_at: now,
            earliest_start: now,
            seq: 0,
            promoted: false,
            completion,
        }
    }

    /// Queue ordering key; smaller sorts first.
    pub fn order_key(&self) -> (bool, Reverse<Priority>, u64) {
        (!self.promoted, Reverse(self.priority), self.seq)
    }

    /// Deliver the terminal outcome to the waiting caller, if any.
    pub fn complete(&mut self, result: Result<Erased, SchedulerError>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }
    }
}

impl<K: Debug> Debug for Request<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id.0)
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Type-erase a caller operation so requests of any result type share a queue.
pub(crate) fn erase<T, F, Fut>(operation: F) -> Operation
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<T, BoxError>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<Erased, BoxError>> {
        let fut = operation();
        Box::pin(async move { fut.await.map(|value| Box::new(value) as Erased) })
    })
}

/// True when the error means the operation observed cancellation.
pub(crate) fn is_cancellation(error: &BoxError) -> bool {
    error.is::<Cancelled>() || matches!(error.downcast_ref::<SchedulerError>(), Some(SchedulerError::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Operation {
        erase(|| async { Ok::<_, BoxError>(()) })
    }

    #[test]
    fn test_order_key() {
        let mut low = Request::new("a", Priority::Low, RetryPolicy::Retry, noop(), None);
        low.seq = 1;
        let mut high = Request::new("b", Priority::High, RetryPolicy::Retry, noop(), None);
        high.seq = 2;
        let mut promoted = Request::new("c", Priority::Low, RetryPolicy::Retry, noop(), None);
        promoted.seq = 3;
        promoted.promoted = true;

        assert!(high.order_key() < low.order_key());
        assert!(promoted.order_key() < high.order_key());
    }

    #[test]
    fn test_cancellation_detection() {
        let cancelled: BoxError = Box::new(Cancelled);
        assert!(is_cancellation(&cancelled));
        let nested: BoxError = Box::new(SchedulerError::Cancelled);
        assert!(is_cancellation(&nested));
        let other: BoxError = "boom".into();
        assert!(!is_cancellation(&other));
    }

    #[tokio::test]
    async fn test_complete_delivers_once() {
        let (tx, rx) = oneshot::channel();
        let mut request = Request::new("k", Priority::Normal, RetryPolicy::Discard, noop(), Some(tx));
        request.complete(Err(SchedulerError::Cancelled));
        request.complete(Ok(Box::new(1u8)));
        assert!(matches!(rx.await.unwrap(), Err(SchedulerError::Cancelled)));
    }
}
