//! Scheduler task: owns the queue and the active-request table.
//!
//! # Responsibilities
//! - Admission: concurrency ceiling, global start spacing, suspension
//! - Single flight per key, with one pending replacement
//! - Retry with backoff, jitter and a token-bucket budget
//! - Cancellation of queued and in-flight work

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::config::SchedulerConfig;
use crate::observability::Instrumentation;
use crate::resilience::{jitter, Backoff, RetryBudget};
use crate::scheduler::request::{
    is_cancellation, BoxError, Erased, Request, RequestId, RequestKey, RetryPolicy, SchedulerError,
};

/// Queue and concurrency snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued: usize,
    pub active: usize,
    pub suspended: bool,
}

pub(crate) enum Command<K> {
    Enqueue(Request<K>),
    Cancel(K),
    CancelAll(oneshot::Sender<()>),
    Suspend,
    Resume,
    Stats(oneshot::Sender<SchedulerStats>),
}

enum Outcome {
    Completed(Result<Erased, BoxError>),
    Cancelled,
}

struct Finished<K> {
    key: K,
    id: RequestId,
    outcome: Outcome,
}

enum Wake<K> {
    Command(Option<Command<K>>),
    Finished(Finished<K>),
    Timer,
}

struct ActiveEntry<K> {
    request: Request<K>,
    cancel: Option<oneshot::Sender<()>>,
    /// Latest request enqueued for this key while it ran.
    replacement: Option<Request<K>>,
    cancelled: bool,
}

struct Slot<K> {
    queued: Option<RequestId>,
    active: Option<ActiveEntry<K>>,
}

impl<K> Default for Slot<K> {
    fn default() -> Self {
        Self {
            queued: None,
            active: None,
        }
    }
}

impl<K> Slot<K> {
    fn is_empty(&self) -> bool {
        self.queued.is_none() && self.active.is_none()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SchedulerSettings {
    pub min_delay: Duration,
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub jitter: Duration,
    pub backoff: Backoff,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            min_delay: Duration::from_millis(config.min_delay_ms),
            max_concurrent: config.max_concurrent,
            max_retries: config.max_retries,
            jitter: Duration::from_millis(config.jitter_ms),
            backoff: Backoff::from_config(&config.backoff),
        }
    }
}

pub(crate) struct SchedulerActor<K> {
    settings: SchedulerSettings,
    retry_budget: RetryBudget,
    queue: VecDeque<Request<K>>,
    slots: HashMap<K, Slot<K>>,
    active_count: usize,
    next_permitted_start: Instant,
    suspended: bool,
    timer: Option<Instant>,
    next_id: u64,
    next_seq: u64,
    drain_waiters: Vec<oneshot::Sender<()>>,
    instrumentation: Arc<dyn Instrumentation>,
    commands: mpsc::UnboundedReceiver<Command<K>>,
    finished_tx: mpsc::UnboundedSender<Finished<K>>,
    finished_rx: mpsc::UnboundedReceiver<Finished<K>>,
}

impl<K: RequestKey> SchedulerActor<K> {
    pub fn new(
        config: &SchedulerConfig,
        instrumentation: Arc<dyn Instrumentation>,
        commands: mpsc::UnboundedReceiver<Command<K>>,
    ) -> Self {
        let now = Instant::now();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Self {
            settings: SchedulerSettings::from(config),
            retry_budget: RetryBudget::from_config(&config.retry_budget, now),
            queue: VecDeque::new(),
            slots: HashMap::new(),
            active_count: 0,
            next_permitted_start: now,
            suspended: false,
            timer: None,
            next_id: 1,
            next_seq: 0,
            drain_waiters: Vec::new(),
            instrumentation,
            commands,
            finished_tx,
            finished_rx,
        }
    }

    pub async fn run(mut self) {
        loop {
            let timer = self.timer;
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                Some(finished) = self.finished_rx.recv() => Wake::Finished(finished),
                _ = async move {
                    match timer {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => Wake::Timer,
            };

            match wake {
                Wake::Command(Some(command)) => self.handle(command),
                Wake::Command(None) => break,
                Wake::Finished(finished) => self.finish(finished),
                Wake::Timer => self.timer = None,
            }
            self.try_start_next();
        }

        self.shutdown();
    }

    fn handle(&mut self, command: Command<K>) {
        match command {
            Command::Enqueue(request) => self.enqueue(request),
            Command::Cancel(key) => self.cancel(&key),
            Command::CancelAll(reply) => self.cancel_all(reply),
            Command::Suspend => {
                self.suspended = true;
                tracing::debug!("Scheduler suspended");
            }
            Command::Resume => {
                self.suspended = false;
                tracing::debug!("Scheduler resumed");
            }
            Command::Stats(reply) => {
                let _ = reply.send(SchedulerStats {
                    queued: self.queue.len(),
                    active: self.active_count,
                    suspended: self.suspended,
                });
            }
        }
    }

    fn enqueue(&mut self, mut request: Request<K>) {
        request.id = self.allocate_id();
        request.seq = self.allocate_seq();

        let slot = self.slots.entry(request.key.clone()).or_default();

        if let Some(active) = slot.active.as_mut() {
            tracing::debug!(key = ?request.key, "Key busy, storing replacement");
            if let Some(mut displaced) = active.replacement.replace(request) {
                displaced.complete(Err(SchedulerError::Cancelled));
            }
            return;
        }

        if let Some(queued_id) = slot.queued.take() {
            if let Some(pos) = self.queue.iter().position(|r| r.id == queued_id) {
                if let Some(mut displaced) = self.queue.remove(pos) {
                    tracing::debug!(key = ?request.key, "Replacing queued request");
                    request.seq = displaced.seq;
                    displaced.complete(Err(SchedulerError::Cancelled));
                }
            }
        }

        self.insert(request);
    }

    /// Insert by priority, FIFO within a priority.
    fn insert(&mut self, request: Request<K>) {
        let key = request.order_key();
        let pos = self
            .queue
            .iter()
            .position(|queued| queued.order_key() > key)
            .unwrap_or(self.queue.len());
        self.slots.entry(request.key.clone()).or_default().queued = Some(request.id);
        self.queue.insert(pos, request);
        self.instrumentation.queue_depth_changed(self.queue.len());
    }

    fn promote(&mut self, mut request: Request<K>) {
        request.promoted = true;
        request.earliest_start = Instant::now();
        self.slots.entry(request.key.clone()).or_default().queued = Some(request.id);
        self.queue.push_front(request);
        self.instrumentation.queue_depth_changed(self.queue.len());
    }

    fn try_start_next(&mut self) {
        self.timer = None;
        while !self.suspended && self.active_count < self.settings.max_concurrent {
            let now = Instant::now();
            let Some(head) = self.queue.front() else {
                break;
            };
            let start_at = head.earliest_start.max(self.next_permitted_start);
            if start_at > now {
                self.timer = Some(start_at);
                break;
            }
            if let Some(request) = self.queue.pop_front() {
                self.instrumentation.queue_depth_changed(self.queue.len());
                self.start(request, now);
            }
        }
    }

    fn start(&mut self, request: Request<K>, now: Instant) {
        self.next_permitted_start = now + self.settings.min_delay;
        self.instrumentation
            .request_waited(now.saturating_duration_since(request.enqueued_at));

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let operation = request.operation.clone();
        let finished = self.finished_tx.clone();
        let key = request.key.clone();
        let id = request.id;

        tracing::debug!(key = ?key, attempt = request.attempt, "Starting request");

        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = operation() => Outcome::Completed(result),
                _ = cancel_rx => Outcome::Cancelled,
            };
            let _ = finished.send(Finished { key, id, outcome });
        });

        let slot = self.slots.entry(request.key.clone()).or_default();
        slot.queued = None;
        slot.active = Some(ActiveEntry {
            request,
            cancel: Some(cancel_tx),
            replacement: None,
            cancelled: false,
        });
        self.active_count += 1;
    }

    fn finish(&mut self, finished: Finished<K>) {
        let Finished { key, id, outcome } = finished;
        let Some(slot) = self.slots.get_mut(&key) else {
            return;
        };
        if !slot.active.as_ref().is_some_and(|entry| entry.request.id == id) {
            return;
        }
        let Some(entry) = slot.active.take() else {
            return;
        };
        self.active_count -= 1;

        let ActiveEntry {
            mut request,
            replacement,
            cancelled,
            ..
        } = entry;

        match outcome {
            _ if cancelled => request.complete(Err(SchedulerError::Cancelled)),
            Outcome::Cancelled => request.complete(Err(SchedulerError::Cancelled)),
            Outcome::Completed(Ok(value)) => request.complete(Ok(value)),
            Outcome::Completed(Err(error)) if is_cancellation(&error) => {
                request.complete(Err(SchedulerError::Cancelled));
            }
            Outcome::Completed(Err(error)) => {
                let retryable = request.policy == RetryPolicy::Retry
                    && request.attempt < self.settings.max_retries
                    && replacement.is_none();
                if retryable {
                    self.schedule_retry(request, &error);
                } else {
                    tracing::warn!(
                        key = ?request.key,
                        attempts = request.attempt + 1,
                        error = %error,
                        "Request failed"
                    );
                    self.instrumentation.request_failed(request.attempt + 1);
                    request.complete(Err(SchedulerError::Failed(error)));
                }
            }
        }

        if let Some(replacement) = replacement {
            self.promote(replacement);
        }
        self.release_slot(&key);

        if self.active_count == 0 {
            for waiter in self.drain_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn schedule_retry(&mut self, mut request: Request<K>, error: &BoxError) {
        let now = Instant::now();
        let delay = self.settings.backoff.delay(request.attempt + 1)
            + jitter(self.settings.jitter)
            + self.retry_budget.next_delay(now);

        request.attempt += 1;
        request.id = self.allocate_id();
        request.seq = self.allocate_seq();
        request.enqueued_at = now;
        request.earliest_start = now + delay;

        tracing::debug!(
            key = ?request.key,
            attempt = request.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying request"
        );
        self.instrumentation.retry_scheduled(request.attempt, delay);
        self.insert(request);
    }

    fn cancel(&mut self, key: &K) {
        let Some(slot) = self.slots.get_mut(key) else {
            return;
        };
        let queued = slot.queued.take();
        if let Some(active) = slot.active.as_mut() {
            active.cancelled = true;
            if let Some(mut replacement) = active.replacement.take() {
                replacement.complete(Err(SchedulerError::Cancelled));
            }
            if let Some(signal) = active.cancel.take() {
                let _ = signal.send(());
            }
        }

        if let Some(queued_id) = queued {
            self.remove_queued(queued_id);
        }
        self.release_slot(key);
        tracing::debug!(key = ?key, "Key cancelled");
    }

    fn cancel_all(&mut self, reply: oneshot::Sender<()>) {
        let cancelled = self.cancel_everything();
        tracing::info!(requests = cancelled, "Cancelling all requests");

        if self.active_count == 0 {
            let _ = reply.send(());
        } else {
            self.drain_waiters.push(reply);
        }
    }

    /// Cancel queued work immediately and signal every in-flight task.
    fn cancel_everything(&mut self) -> usize {
        let mut count = self.queue.len();
        for mut request in self.queue.drain(..) {
            request.complete(Err(SchedulerError::Cancelled));
        }
        for slot in self.slots.values_mut() {
            slot.queued = None;
            if let Some(active) = slot.active.as_mut() {
                count += 1;
                active.cancelled = true;
                if let Some(mut replacement) = active.replacement.take() {
                    replacement.complete(Err(SchedulerError::Cancelled));
                }
                if let Some(signal) = active.cancel.take() {
                    let _ = signal.send(());
                }
            }
        }
        self.slots.retain(|_, slot| !slot.is_empty());
        self.timer = None;
        self.instrumentation.queue_depth_changed(0);
        count
    }

    fn remove_queued(&mut self, id: RequestId) {
        if let Some(pos) = self.queue.iter().position(|r| r.id == id) {
            if let Some(mut request) = self.queue.remove(pos) {
                request.complete(Err(SchedulerError::Cancelled));
            }
            self.instrumentation.queue_depth_changed(self.queue.len());
        }
    }

    fn release_slot(&mut self, key: &K) {
        if self.slots.get(key).is_some_and(Slot::is_empty) {
            self.slots.remove(key);
        }
    }

    fn shutdown(&mut self) {
        self.cancel_everything();
        for slot in self.slots.values_mut() {
            if let Some(mut active) = slot.active.take() {
                active.request.complete(Err(SchedulerError::Cancelled));
            }
        }
        self.slots.clear();
        self.active_count = 0;
        for waiter in self.drain_waiters.drain(..) {
            let _ = waiter.send(());
        }
        tracing::debug!("Scheduler stopped");
    }

    fn allocate_id(&mut self) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        id
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
