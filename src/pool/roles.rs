//! Primary/standby role assignment.
//!
//! # Responsibilities
//! - Pick the fastest eligible server as primary, the next as standby
//! - Keep the current primary while it stays eligible (no flapping)
//! - Still name a target when every server is quarantined
//!
//! # Design Decisions
//! - Pure and total: same inputs, same outputs, independent of input order
//! - Unknown latency sorts after every measured latency
//! - Ties break on index so results are deterministic

use std::cmp::Ordering;
use std::time::Duration;
use tokio::time::Instant;

/// Role of a server within the pool. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Standby,
    Candidate,
}

/// Inputs the role computation needs for one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerMetrics {
    pub index: usize,
    pub next_retry_at: Instant,
    pub last_latency: Option<Duration>,
}

impl ServerMetrics {
    pub fn is_available(&self, now: Instant) -> bool {
        now >= self.next_retry_at
    }
}

/// Outcome of role assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoleAssignment {
    pub primary: Option<usize>,
    pub standby: Option<usize>,
}

impl RoleAssignment {
    pub fn role_of(&self, index: usize) -> Role {
        if self.primary == Some(index) {
            Role::Primary
        } else if self.standby == Some(index) {
            Role::Standby
        } else {
            Role::Candidate
        }
    }
}

/// Ordering key for latency where "unknown" is slower than anything measured.
pub(crate) fn compare_latency(a: Option<Duration>, b: Option<Duration>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Order eligible servers: ascending latency, then index.
pub(crate) fn by_latency(a: &ServerMetrics, b: &ServerMetrics) -> Ordering {
    compare_latency(a.last_latency, b.last_latency).then(a.index.cmp(&b.index))
}

/// Order quarantined servers: earliest deadline, then latency, then index.
pub(crate) fn by_deadline(a: &ServerMetrics, b: &ServerMetrics) -> Ordering {
    a.next_retry_at
        .cmp(&b.next_retry_at)
        .then_with(|| by_latency(a, b))
}

/// Compute primary and standby from the current metrics.
pub fn determine_roles(
    metrics: &[ServerMetrics],
    now: Instant,
    preferred_primary: Option<usize>,
) -> RoleAssignment {
    let (mut available, mut deferred): (Vec<ServerMetrics>, Vec<ServerMetrics>) =
        metrics.iter().copied().partition(|m| m.is_available(now));

    available.sort_by(by_latency);
    deferred.sort_by(by_deadline);

    if let Some(preferred) = preferred_primary {
        if let Some(pos) = available.iter().position(|m| m.index == preferred) {
            let sticky = available.remove(pos);
            available.insert(0, sticky);
        }
    }

    let primary = available
        .first()
        .or_else(|| deferred.first())
        .map(|m| m.index);

    let standby = available
        .iter()
        .chain(deferred.iter())
        .map(|m| m.index)
        .find(|&index| Some(index) != primary);

    RoleAssignment { primary, standby }
}
