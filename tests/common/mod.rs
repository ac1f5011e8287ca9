//! Shared utilities for pool and scheduler integration tests.

#![allow(dead_code)]

use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use url::Url;

use bch_wallet_net::config::{BudgetConfig, PoolConfig};
use bch_wallet_net::health::{HealthRepository, RepositoryError, ServerHealthSnapshot};
use bch_wallet_net::pool::{ConnectionError, NodeConnection};

/// Scriptable connection. Clones share state, so a test can keep one
/// clone and flip behavior after handing the other to the pool.
#[derive(Debug, Clone)]
pub struct MockConnection {
    inner: Arc<MockState>,
}

#[derive(Debug)]
struct MockState {
    name: String,
    latency_ms: AtomicU64,
    fail_start: AtomicBool,
    fail_ping: AtomicBool,
    starts: AtomicU32,
    stops: AtomicU32,
    pings: AtomicU32,
}

impl MockConnection {
    pub fn new(name: &str, latency_ms: u64) -> Self {
        Self {
            inner: Arc::new(MockState {
                name: name.to_string(),
                latency_ms: AtomicU64::new(latency_ms),
                fail_start: AtomicBool::new(false),
                fail_ping: AtomicBool::new(false),
                starts: AtomicU32::new(0),
                stops: AtomicU32::new(0),
                pings: AtomicU32::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn set_latency_ms(&self, latency_ms: u64) {
        self.inner.latency_ms.store(latency_ms, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.inner.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_ping(&self, fail: bool) {
        self.inner.fail_ping.store(fail, Ordering::SeqCst);
    }

    pub fn starts(&self) -> u32 {
        self.inner.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.inner.stops.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> u32 {
        self.inner.pings.load(Ordering::SeqCst)
    }
}

impl NodeConnection for MockConnection {
    fn start(&self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            self.inner.starts.fetch_add(1, Ordering::SeqCst);
            if self.inner.fail_start.load(Ordering::SeqCst) {
                return Err(ConnectionError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.inner.stops.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), ConnectionError>> {
        Box::pin(async move {
            self.inner.pings.fetch_add(1, Ordering::SeqCst);
            let latency = self.inner.latency_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(latency)).await;
            if self.inner.fail_ping.load(Ordering::SeqCst) {
                return Err(ConnectionError::Timeout(5));
            }
            Ok(())
        })
    }
}

/// Repository whose writes always fail.
#[derive(Debug, Default)]
pub struct FailingRepository;

impl HealthRepository for FailingRepository {
    fn history<'a>(&'a self, _endpoint: &'a Url) -> BoxFuture<'a, Option<ServerHealthSnapshot>> {
        Box::pin(async { None })
    }

    fn record_probe<'a>(
        &'a self,
        _endpoint: &'a Url,
        _latency: Option<Duration>,
        _healthy: bool,
    ) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(async { Err(RepositoryError::Unavailable("disk full".into())) })
    }

    fn quarantine<'a>(
        &'a self,
        _endpoint: &'a Url,
        _until: SystemTime,
    ) -> BoxFuture<'a, Result<(), RepositoryError>> {
        Box::pin(async { Err(RepositoryError::Unavailable("disk full".into())) })
    }
}

pub fn url(host: &str) -> Url {
    Url::parse(&format!("tcp://{}:50001", host)).unwrap()
}

/// Pool settings without jitter so quarantine deadlines are exact.
pub fn pool_config() -> PoolConfig {
    PoolConfig {
        jitter_ms: 0,
        server_budget: BudgetConfig {
            max_attempts: 3,
            replenish_secs: 60,
        },
        global_budget: BudgetConfig {
            max_attempts: 10,
            replenish_secs: 60,
        },
        ..PoolConfig::default()
    }
}
