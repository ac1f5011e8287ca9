//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the node
//! client. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the wallet's node client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WalletNetConfig {
    /// Connection pool settings.
    pub pool: PoolConfig,

    /// Request scheduler settings.
    pub scheduler: SchedulerConfig,

    /// Health persistence settings.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Server URLs (e.g., "tcp://bch.imaginary.cash:50001").
    /// Empty means a single default server.
    pub bootstrap_urls: Vec<String>,

    /// Ceiling for a server's quarantine delay in seconds.
    pub max_backoff_secs: u64,

    /// Upper bound of the random jitter added to a quarantine, in milliseconds.
    pub jitter_ms: u64,

    /// Probe latency above which a reachable server counts as degraded.
    pub slow_latency_ms: u64,

    /// Transport connect/request timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Reconnect budget applied to each server individually.
    pub server_budget: BudgetConfig,

    /// Reconnect budget shared by all servers.
    pub global_budget: BudgetConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            bootstrap_urls: Vec::new(),
            max_backoff_secs: 300,
            jitter_ms: 500,
            slow_latency_ms: 2000,
            connect_timeout_secs: 10,
            server_budget: BudgetConfig {
                max_attempts: 3,
                replenish_secs: 60,
            },
            global_budget: BudgetConfig {
                max_attempts: 10,
                replenish_secs: 60,
            },
        }
    }
}

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct BudgetConfig {
    /// Attempts allowed in a burst (bucket capacity is one less).
    pub max_attempts: u32,

    /// Time for an empty bucket to refill completely, in seconds.
    pub replenish_secs: u64,
}

/// Request scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum spacing between any two request starts, in milliseconds.
    pub min_delay_ms: u64,

    /// Maximum number of requests in flight at once.
    pub max_concurrent: usize,

    /// Retries allowed after the first attempt.
    pub max_retries: u32,

    /// Upper bound of the random jitter added to a retry, in milliseconds.
    pub jitter_ms: u64,

    /// Exponential backoff between retries.
    pub backoff: BackoffConfig,

    /// Token bucket shared by every retry.
    pub retry_budget: BudgetConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 50,
            max_concurrent: 4,
            max_retries: 3,
            jitter_ms: 100,
            backoff: BackoffConfig::default(),
            retry_budget: BudgetConfig {
                max_attempts: 10,
                replenish_secs: 60,
            },
        }
    }
}

/// Backoff schedule configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry in milliseconds.
    pub initial_ms: u64,

    /// Growth factor per retry.
    pub multiplier: f64,

    /// Maximum delay in milliseconds.
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 200,
            multiplier: 2.0,
            max_ms: 10_000,
        }
    }
}

/// Health persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HealthConfig {
    /// JSON file holding per-server health. None keeps health in memory only.
    pub persistence_path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
