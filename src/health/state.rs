//! Server health state.
//!
//! # States
//! - Healthy: last probe succeeded at acceptable latency
//! - Degraded: reachable but slow, or recently failing and due for a retry
//! - Unhealthy: quarantined after a failure
//!
//! # State Transitions
//! ```text
//! any → Healthy:    probe succeeds (latency <= slow threshold)
//! any → Degraded:   probe succeeds slowly, or quarantine lapses
//! any → Unhealthy:  probe fails and a quarantine deadline is set
//! ```
//!
//! # Design Decisions
//! - Snapshots hold wall-clock instants so they survive restarts
//! - In-memory scheduling uses the monotonic clock; conversion happens here

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Connectivity as seen by the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Offline,
    Connecting,
    Online,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Offline => "offline",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Online => "online",
        };
        f.write_str(s)
    }
}

/// Health classification of a single server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCondition {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthCondition {
    /// Classify a server from its recent probe outcomes.
    pub fn classify(
        failures: u32,
        quarantined: bool,
        latency: Option<Duration>,
        slow_threshold: Option<Duration>,
    ) -> Self {
        if quarantined {
            return HealthCondition::Unhealthy;
        }
        if failures > 0 {
            return HealthCondition::Degraded;
        }
        match (latency, slow_threshold) {
            (Some(latency), Some(threshold)) if latency > threshold => HealthCondition::Degraded,
            _ => HealthCondition::Healthy,
        }
    }

    /// Map the condition onto the wallet-facing status.
    pub fn wallet_status(self) -> ConnectionStatus {
        match self {
            HealthCondition::Healthy => ConnectionStatus::Online,
            HealthCondition::Degraded => ConnectionStatus::Connecting,
            HealthCondition::Unhealthy => ConnectionStatus::Offline,
        }
    }
}

/// Durable per-endpoint health record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerHealthSnapshot {
    /// Latency of the last successful probe.
    pub latency: Option<Duration>,
    pub condition: HealthCondition,
    /// Consecutive failed probes.
    pub failures: u32,
    /// Not eligible for selection before this instant.
    pub quarantine_until: Option<SystemTime>,
    /// Time of the last successful probe.
    pub last_ok: Option<SystemTime>,
}

impl Default for ServerHealthSnapshot {
    fn default() -> Self {
        Self {
            latency: None,
            condition: HealthCondition::Healthy,
            failures: 0,
            quarantine_until: None,
            last_ok: None,
        }
    }
}

impl ServerHealthSnapshot {
    pub fn wallet_status(&self) -> ConnectionStatus {
        self.condition.wallet_status()
    }

    /// True while the quarantine deadline lies after `now`.
    pub fn is_quarantined_at(&self, now: SystemTime) -> bool {
        self.quarantine_until.is_some_and(|until| until > now)
    }
}

/// Pair of clock readings used to translate between monotonic and wall time.
#[derive(Debug, Clone, Copy)]
pub struct ClockPair {
    pub instant: Instant,
    pub system: SystemTime,
}

impl ClockPair {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            system: SystemTime::now(),
        }
    }

    /// Wall-clock equivalent of a monotonic instant.
    pub fn to_system(&self, at: Instant) -> SystemTime {
        if at >= self.instant {
            self.system + (at - self.instant)
        } else {
            self.system
                .checked_sub(self.instant - at)
                .unwrap_or(SystemTime::UNIX_EPOCH)
        }
    }

    /// Monotonic equivalent of a wall-clock time. Past times map to `now`.
    pub fn to_instant(&self, at: SystemTime) -> Instant {
        match at.duration_since(self.system) {
            Ok(ahead) => self.instant + ahead,
            Err(_) => self.instant,
        }
    }
}
