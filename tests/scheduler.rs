//! Request scheduler behavior: single flight, pacing, retries, cancellation.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use bch_wallet_net::config::{BackoffConfig, BudgetConfig, SchedulerConfig};
use bch_wallet_net::observability::Instrumentation;
use bch_wallet_net::scheduler::{
    BoxError, Cancelled, Priority, RequestScheduler, RetryPolicy, SchedulerError,
};

fn config(max_concurrent: usize, min_delay_ms: u64) -> SchedulerConfig {
    SchedulerConfig {
        min_delay_ms,
        max_concurrent,
        max_retries: 3,
        jitter_ms: 0,
        backoff: BackoffConfig {
            initial_ms: 10,
            multiplier: 2.0,
            max_ms: 100,
        },
        retry_budget: BudgetConfig {
            max_attempts: 10,
            replenish_secs: 60,
        },
    }
}

/// Operation that counts executions and succeeds after `sleep_ms`.
fn counted(
    counter: &Arc<AtomicU32>,
    sleep_ms: u64,
) -> impl Fn() -> futures_util::future::BoxFuture<'static, Result<u32, BoxError>> + Send + Sync + 'static
{
    let counter = counter.clone();
    move || {
        let counter = counter.clone();
        Box::pin(async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            Ok(n)
        })
    }
}

/// Operation that appends `label` to `log` when it starts.
fn logged(
    log: &Arc<Mutex<Vec<&'static str>>>,
    label: &'static str,
    sleep_ms: u64,
) -> impl Fn() -> futures_util::future::BoxFuture<'static, Result<(), BoxError>> + Send + Sync + 'static
{
    let log = log.clone();
    move || {
        let log = log.clone();
        Box::pin(async move {
            log.lock().unwrap().push(label);
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            Ok(())
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_runs_active_and_latest() {
    let scheduler = RequestScheduler::spawn(&config(4, 0)).unwrap();
    let executions = Arc::new(AtomicU32::new(0));

    let pending: Vec<_> = (0..6)
        .map(|_| {
            scheduler.submit(
                "balance",
                Priority::Normal,
                RetryPolicy::Retry,
                counted(&executions, 100),
            )
        })
        .collect();

    let mut outcomes = Vec::new();
    for p in pending {
        outcomes.push(p.wait().await);
    }

    assert_eq!(executions.load(Ordering::SeqCst), 2);
    assert!(matches!(outcomes[0], Ok(1)));
    for outcome in &outcomes[1..5] {
        assert!(matches!(outcome, Err(SchedulerError::Cancelled)));
    }
    assert!(matches!(outcomes[5], Ok(2)));
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhaust_then_fail() {
    let scheduler = RequestScheduler::spawn(&config(1, 0)).unwrap();
    let executions = Arc::new(AtomicU32::new(0));
    let counter = executions.clone();

    let result: Result<(), _> = scheduler
        .perform("utxos", Priority::Normal, RetryPolicy::Retry, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), BoxError>("server busy".into())
            }
        })
        .await;

    assert!(matches!(result, Err(SchedulerError::Failed(_))));
    assert_eq!(executions.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers() {
    let scheduler = RequestScheduler::spawn(&config(1, 0)).unwrap();
    let executions = Arc::new(AtomicU32::new(0));
    let counter = executions.clone();

    let value = scheduler
        .perform("history", Priority::Normal, RetryPolicy::Retry, move || {
            let counter = counter.clone();
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err::<&str, BoxError>("transient".into()),
                    _ => Ok("tx list"),
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "tx list");
    assert_eq!(executions.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_discard_policy_fails_once() {
    let scheduler = RequestScheduler::spawn(&config(1, 0)).unwrap();
    let executions = Arc::new(AtomicU32::new(0));
    let counter = executions.clone();

    let result: Result<(), _> = scheduler
        .perform("fee", Priority::Normal, RetryPolicy::Discard, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), BoxError>("nope".into())
            }
        })
        .await;

    assert!(matches!(result, Err(SchedulerError::Failed(_))));
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_marker_is_not_retried() {
    let scheduler = RequestScheduler::spawn(&config(1, 0)).unwrap();
    let executions = Arc::new(AtomicU32::new(0));
    let counter = executions.clone();

    let result: Result<(), _> = scheduler
        .perform("header", Priority::Normal, RetryPolicy::Retry, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), BoxError>(Box::new(Cancelled))
            }
        })
        .await;

    assert!(matches!(result, Err(SchedulerError::Cancelled)));
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_starts_are_spaced_by_min_delay() {
    let scheduler = RequestScheduler::spawn(&config(1, 150)).unwrap();
    let starts = Arc::new(Mutex::new(Vec::new()));

    let op = |starts: &Arc<Mutex<Vec<Instant>>>| {
        let starts = starts.clone();
        move || {
            let starts = starts.clone();
            async move {
                starts.lock().unwrap().push(Instant::now());
                Ok::<_, BoxError>(())
            }
        }
    };

    let a = scheduler.submit("a", Priority::Normal, RetryPolicy::Retry, op(&starts));
    let b = scheduler.submit("b", Priority::Normal, RetryPolicy::Retry, op(&starts));
    a.wait().await.unwrap();
    b.wait().await.unwrap();

    let starts = starts.lock().unwrap();
    assert_eq!(starts.len(), 2);
    assert!(starts[1] - starts[0] >= Duration::from_millis(150));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_ceiling() {
    let scheduler = RequestScheduler::spawn(&config(2, 0)).unwrap();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let pending: Vec<_> = (0..6u32)
        .map(|key| {
            let current = current.clone();
            let peak = peak.clone();
            scheduler.submit(key, Priority::Normal, RetryPolicy::Retry, move || {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            })
        })
        .collect();

    for p in pending {
        p.wait().await.unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_queued_and_active() {
    let scheduler = RequestScheduler::spawn(&config(1, 0)).unwrap();
    let active_runs = Arc::new(AtomicU32::new(0));
    let queued_runs = Arc::new(AtomicU32::new(0));

    let active = scheduler.submit("a", Priority::Normal, RetryPolicy::Retry, counted(&active_runs, 1_000));
    let queued = scheduler.submit("b", Priority::Normal, RetryPolicy::Retry, counted(&queued_runs, 10));

    scheduler.cancel("b");
    scheduler.cancel("a");

    assert!(matches!(queued.wait().await, Err(SchedulerError::Cancelled)));
    assert!(matches!(active.wait().await, Err(SchedulerError::Cancelled)));
    assert_eq!(queued_runs.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.active_count().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_leaves_scheduler_reusable() {
    let scheduler = RequestScheduler::spawn(&config(2, 0)).unwrap();
    let runs = Arc::new(AtomicU32::new(0));

    let pending: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|key| scheduler.submit(key, Priority::Normal, RetryPolicy::Retry, counted(&runs, 5_000)))
        .collect();
    // Replacement behind an active key.
    let replacement = scheduler.submit("a", Priority::Normal, RetryPolicy::Retry, counted(&runs, 10));

    scheduler.cancel_all().await;

    let stats = scheduler.stats().await.unwrap();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.active, 0);
    for p in pending {
        assert!(matches!(p.wait().await, Err(SchedulerError::Cancelled)));
    }
    assert!(matches!(replacement.wait().await, Err(SchedulerError::Cancelled)));

    let value = scheduler
        .perform("a", Priority::Normal, RetryPolicy::Retry, || async { Ok::<_, BoxError>(7u8) })
        .await
        .unwrap();
    assert_eq!(value, 7);
}

#[tokio::test(start_paused = true)]
async fn test_suspend_holds_queue_until_resume() {
    let scheduler = RequestScheduler::spawn(&config(2, 0)).unwrap();
    let runs = Arc::new(AtomicU32::new(0));

    scheduler.suspend();
    let pending = scheduler.submit("a", Priority::Normal, RetryPolicy::Retry, counted(&runs, 10));

    tokio::time::sleep(Duration::from_secs(1)).await;
    let stats = scheduler.stats().await.unwrap();
    assert!(stats.suspended);
    assert_eq!(stats.queued, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    scheduler.resume();
    assert_eq!(pending.wait().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_priority_order() {
    let scheduler = RequestScheduler::spawn(&config(1, 0)).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let blocker = scheduler.submit("blocker", Priority::Low, RetryPolicy::Retry, logged(&log, "blocker", 100));
    let low = scheduler.submit("low", Priority::Low, RetryPolicy::Retry, logged(&log, "low", 0));
    let normal = scheduler.submit("normal", Priority::Normal, RetryPolicy::Retry, logged(&log, "normal", 0));
    let high = scheduler.submit("high", Priority::High, RetryPolicy::Retry, logged(&log, "high", 0));

    for p in [blocker, low, normal, high] {
        p.wait().await.unwrap();
    }
    assert_eq!(*log.lock().unwrap(), vec!["blocker", "high", "normal", "low"]);
}

#[tokio::test(start_paused = true)]
async fn test_replacement_is_promoted_to_front() {
    let scheduler = RequestScheduler::spawn(&config(1, 0)).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let first = scheduler.submit("a", Priority::Low, RetryPolicy::Retry, logged(&log, "a1", 100));
    let b = scheduler.submit("b", Priority::Normal, RetryPolicy::Retry, logged(&log, "b", 0));
    let c = scheduler.submit("c", Priority::High, RetryPolicy::Retry, logged(&log, "c", 0));
    let second = scheduler.submit("a", Priority::Low, RetryPolicy::Retry, logged(&log, "a2", 0));

    for p in [first, b, c, second] {
        p.wait().await.unwrap();
    }
    assert_eq!(*log.lock().unwrap(), vec!["a1", "a2", "c", "b"]);
}

#[tokio::test(start_paused = true)]
async fn test_queued_request_replaced_in_place() {
    let scheduler = RequestScheduler::spawn(&config(1, 0)).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let blocker = scheduler.submit("x", Priority::Normal, RetryPolicy::Retry, logged(&log, "x", 100));
    let stale = scheduler.submit("k", Priority::Normal, RetryPolicy::Retry, logged(&log, "k1", 0));
    let other = scheduler.submit("m", Priority::Normal, RetryPolicy::Retry, logged(&log, "m", 0));
    let fresh = scheduler.submit("k", Priority::Normal, RetryPolicy::Retry, logged(&log, "k2", 0));

    assert!(matches!(stale.wait().await, Err(SchedulerError::Cancelled)));
    for p in [blocker, other, fresh] {
        p.wait().await.unwrap();
    }
    assert_eq!(*log.lock().unwrap(), vec!["x", "k2", "m"]);
}

#[tokio::test(start_paused = true)]
async fn test_failure_with_waiting_replacement_is_not_retried() {
    let scheduler = RequestScheduler::spawn(&config(1, 0)).unwrap();
    let failing_runs = Arc::new(AtomicU32::new(0));
    let counter = failing_runs.clone();

    let failing = scheduler.submit("k", Priority::Normal, RetryPolicy::Retry, move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<u8, BoxError>("stale".into())
        }
    });
    let replacement = scheduler.submit("k", Priority::Normal, RetryPolicy::Retry, || async {
        Ok::<u8, BoxError>(2)
    });

    assert!(matches!(failing.wait().await, Err(SchedulerError::Failed(_))));
    assert_eq!(replacement.wait().await.unwrap(), 2);
    assert_eq!(failing_runs.load(Ordering::SeqCst), 1);
}

#[derive(Default)]
struct Counting {
    retries: AtomicU32,
    failures: AtomicU32,
    last_attempts: AtomicU32,
}

impl Instrumentation for Counting {
    fn retry_scheduled(&self, _attempt: u32, _delay: Duration) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn request_failed(&self, attempts: u32) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.last_attempts.store(attempts, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn test_instrumentation_sees_retries() {
    let counting = Arc::new(Counting::default());
    let scheduler = RequestScheduler::with_instrumentation(&config(1, 0), counting.clone()).unwrap();

    let result: Result<(), _> = scheduler
        .perform("k", Priority::Normal, RetryPolicy::Retry, || async {
            Err::<(), BoxError>("down".into())
        })
        .await;

    assert!(result.is_err());
    assert_eq!(counting.retries.load(Ordering::SeqCst), 3);
    assert_eq!(counting.failures.load(Ordering::SeqCst), 1);
    assert_eq!(counting.last_attempts.load(Ordering::SeqCst), 4);
}
