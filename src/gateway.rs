//! Scheduled calls against pooled node connections.
//!
//! # Responsibilities
//! - Run caller operations under the scheduler's keyed admission
//! - Acquire a health-checked connection for every attempt
//! - Report transport failures to the pool so the next attempt fails over

use std::future::Future;
use std::sync::Arc;

use crate::pool::{ConnectionError, ConnectionPool, NodeConnection};
use crate::scheduler::{BoxError, Priority, RequestKey, RequestScheduler, RetryPolicy, SchedulerResult};

/// Pool and scheduler wired together.
pub struct NodeGateway<C, K> {
    pool: ConnectionPool<C>,
    scheduler: RequestScheduler<K>,
}

impl<C, K> Clone for NodeGateway<C, K> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<C: NodeConnection, K: RequestKey> NodeGateway<C, K> {
    pub fn new(pool: ConnectionPool<C>, scheduler: RequestScheduler<K>) -> Self {
        Self { pool, scheduler }
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    pub fn scheduler(&self) -> &RequestScheduler<K> {
        &self.scheduler
    }

    /// Run `operation` on a live connection under `key`.
    ///
    /// Each attempt acquires afresh. A transport error reports the
    /// connection to the pool before the scheduler decides on a retry.
    pub async fn call<T, F, Fut>(
        &self,
        key: K,
        priority: Priority,
        policy: RetryPolicy,
        operation: F,
    ) -> SchedulerResult<T>
    where
        T: Send + 'static,
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ConnectionError>> + Send + 'static,
    {
        let pool = self.pool.clone();
        let operation = Arc::new(operation);

        self.scheduler
            .perform(key, priority, policy, move || {
                let pool = pool.clone();
                let operation = operation.clone();
                attempt(pool, operation)
            })
            .await
    }
}

async fn attempt<C, T, F, Fut>(pool: ConnectionPool<C>, operation: Arc<F>) -> Result<T, BoxError>
where
    C: NodeConnection,
    F: Fn(Arc<C>) -> Fut,
    Fut: Future<Output = Result<T, ConnectionError>>,
{
    let connection = pool.acquire().await?;
    match operation(connection.clone()).await {
        Ok(value) => Ok(value),
        Err(error) => {
            if is_transport_failure(&error) {
                if let Err(pool_error) = pool.report_failure(&connection).await {
                    tracing::warn!(error = %pool_error, "Failover after call error failed");
                }
            }
            Err(error.into())
        }
    }
}

/// RPC errors are answers from a healthy server, not transport failures.
fn is_transport_failure(error: &ConnectionError) -> bool {
    !matches!(error, ConnectionError::Rpc { .. })
}
