//! Public scheduler handles.
//!
//! # Responsibilities
//! - Spawn the scheduler task from validated configuration
//! - Type-erase caller operations on the way in, restore types on the way out
//! - Per-key handles for callers that always work on one slot

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::config::validation::validate_scheduler;
use crate::config::{ConfigError, SchedulerConfig};
use crate::observability::{Instrumentation, NoopInstrumentation};
use crate::scheduler::actor::{Command, SchedulerActor, SchedulerStats};
use crate::scheduler::request::{
    erase, BoxError, Erased, Priority, Request, RequestKey, RetryPolicy, SchedulerError,
    SchedulerResult,
};

/// Handle to a running request scheduler. Cheap to clone.
pub struct RequestScheduler<K> {
    commands: mpsc::UnboundedSender<Command<K>>,
}

impl<K> Clone for RequestScheduler<K> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<K> std::fmt::Debug for RequestScheduler<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScheduler")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl<K: RequestKey> RequestScheduler<K> {
    /// Start a scheduler without instrumentation.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        Self::with_instrumentation(config, Arc::new(NoopInstrumentation))
    }

    /// Start a scheduler reporting queue and retry events to `instrumentation`.
    pub fn with_instrumentation(
        config: &SchedulerConfig,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> Result<Self, ConfigError> {
        validate_scheduler(config)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let actor = SchedulerActor::new(config, instrumentation, rx);
        tokio::spawn(actor.run());

        tracing::info!(
            max_concurrent = config.max_concurrent,
            min_delay_ms = config.min_delay_ms,
            max_retries = config.max_retries,
            "Request scheduler started"
        );

        Ok(Self { commands: tx })
    }

    /// Handle bound to one key.
    pub fn handle(&self, key: K) -> KeyHandle<K> {
        KeyHandle {
            scheduler: self.clone(),
            key,
        }
    }

    /// Queue an operation without waiting for it. Returns the key.
    pub fn enqueue<T, F, Fut>(&self, key: K, priority: Priority, policy: RetryPolicy, operation: F) -> K
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        let request = Request::new(key.clone(), priority, policy, erase(operation), None);
        let _ = self.commands.send(Command::Enqueue(request));
        key
    }

    /// Queue an operation and return a handle to its eventual result.
    pub fn submit<T, F, Fut>(
        &self,
        key: K,
        priority: Priority,
        policy: RetryPolicy,
        operation: F,
    ) -> PendingResult<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let request = Request::new(key, priority, policy, erase(operation), Some(tx));
        // A closed scheduler drops the sender; the caller sees `Closed`.
        let _ = self.commands.send(Command::Enqueue(request));
        PendingResult {
            receiver: rx,
            _marker: PhantomData,
        }
    }

    /// Run an operation under `key` and wait for its outcome.
    pub async fn perform<T, F, Fut>(
        &self,
        key: K,
        priority: Priority,
        policy: RetryPolicy,
        operation: F,
    ) -> SchedulerResult<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.submit(key, priority, policy, operation).wait().await
    }

    /// Cancel queued and in-flight work for one key.
    pub fn cancel(&self, key: K) {
        let _ = self.commands.send(Command::Cancel(key));
    }

    /// Cancel everything. Resolves once in-flight operations have wound down.
    pub async fn cancel_all(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::CancelAll(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop starting new requests. In-flight work continues.
    pub fn suspend(&self) {
        let _ = self.commands.send(Command::Suspend);
    }

    pub fn resume(&self) {
        let _ = self.commands.send(Command::Resume);
    }

    pub async fn stats(&self) -> SchedulerResult<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats(tx))
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    /// Number of requests waiting to start.
    pub async fn queue_depth(&self) -> SchedulerResult<usize> {
        Ok(self.stats().await?.queued)
    }

    /// Number of requests currently executing.
    pub async fn active_count(&self) -> SchedulerResult<usize> {
        Ok(self.stats().await?.active)
    }
}

/// Scheduler handle bound to a single key.
#[derive(Debug, Clone)]
pub struct KeyHandle<K> {
    scheduler: RequestScheduler<K>,
    key: K,
}

impl<K: RequestKey> KeyHandle<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn enqueue<T, F, Fut>(&self, priority: Priority, policy: RetryPolicy, operation: F) -> K
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.scheduler
            .enqueue(self.key.clone(), priority, policy, operation)
    }

    pub async fn perform<T, F, Fut>(
        &self,
        priority: Priority,
        policy: RetryPolicy,
        operation: F,
    ) -> SchedulerResult<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.scheduler
            .perform(self.key.clone(), priority, policy, operation)
            .await
    }

    pub fn cancel(&self) {
        self.scheduler.cancel(self.key.clone());
    }
}

/// Outcome of a submitted request, delivered exactly once.
#[derive(Debug)]
pub struct PendingResult<T> {
    receiver: oneshot::Receiver<Result<Erased, SchedulerError>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> PendingResult<T> {
    pub async fn wait(self) -> SchedulerResult<T> {
        match self.receiver.await {
            Ok(Ok(value)) => value
                .downcast::<T>()
                .map(|value| *value)
                .map_err(|_| SchedulerError::Failed("unexpected result type".into())),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(SchedulerError::Closed),
        }
    }
}
