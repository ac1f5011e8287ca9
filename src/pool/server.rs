//! Server record.
//!
//! # Responsibilities
//! - Pair one connection handle with its mutable health and role state
//! - Own the server's reconnect budget
//! - Keep the cached health snapshot in sync with probe outcomes

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::health::{ConnectionStatus, HealthCondition, ServerHealthSnapshot};
use crate::pool::roles::{Role, ServerMetrics};
use crate::resilience::RetryBudget;

/// A single backend node as tracked by the pool.
pub(crate) struct Server<C> {
    /// Connection handle, shared with callers that acquired it.
    pub connection: Arc<C>,
    /// Identifying URL. `None` is the default server.
    pub endpoint: Option<Url>,
    /// Consecutive failures.
    pub failure_count: u32,
    /// Quarantine deadline.
    pub next_retry_at: Instant,
    pub status: ConnectionStatus,
    pub last_latency: Option<Duration>,
    pub last_success_at: Option<Instant>,
    pub role: Role,
    pub retry_budget: RetryBudget,
    /// Cached copy of the persisted health.
    pub health: ServerHealthSnapshot,
}

impl<C> Server<C> {
    pub fn new(endpoint: Option<Url>, connection: C, retry_budget: RetryBudget, now: Instant) -> Self {
        Self {
            connection: Arc::new(connection),
            endpoint,
            failure_count: 0,
            next_retry_at: now,
            status: ConnectionStatus::Offline,
            last_latency: None,
            last_success_at: None,
            role: Role::Candidate,
            retry_budget,
            health: ServerHealthSnapshot::default(),
        }
    }

    /// True when the quarantine has lapsed.
    pub fn is_available(&self, now: Instant) -> bool {
        now >= self.next_retry_at
    }

    pub fn metrics(&self, index: usize) -> ServerMetrics {
        ServerMetrics {
            index,
            next_retry_at: self.next_retry_at,
            last_latency: self.last_latency,
        }
    }

    /// Label used in logs and metrics.
    pub fn label(&self) -> String {
        match &self.endpoint {
            Some(url) => url.to_string(),
            None => "default".to_string(),
        }
    }

    /// Apply a successful probe to the in-memory state.
    pub fn mark_success(&mut self, latency: Duration, now: Instant, slow_threshold: Option<Duration>) {
        self.failure_count = 0;
        self.next_retry_at = now;
        self.status = ConnectionStatus::Online;
        self.last_latency = Some(latency);
        self.last_success_at = Some(now);
        self.retry_budget.reset(now);

        self.health.failures = 0;
        self.health.latency = Some(latency);
        self.health.quarantine_until = None;
        self.health.condition = HealthCondition::classify(0, false, Some(latency), slow_threshold);
    }

    /// Apply a failed probe to the in-memory state.
    pub fn mark_failure(&mut self, retry_at: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.next_retry_at = retry_at;
        self.status = ConnectionStatus::Offline;

        self.health.failures = self.failure_count;
        self.health.condition = HealthCondition::Unhealthy;
    }
}
