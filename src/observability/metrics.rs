//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define node-client metrics (pool status, node health, probe latency)
//! - Provide the scheduler instrumentation hook and its metrics-backed impl
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `wallet_pool_status` (gauge): 0=offline, 1=connecting, 2=online
//! - `wallet_node_health` (gauge): 1=healthy, 0.5=degraded, 0=unhealthy
//! - `wallet_node_probe_seconds` (histogram): probe latency per endpoint
//! - `wallet_scheduler_queue_depth` (gauge)
//! - `wallet_scheduler_wait_seconds` (histogram): enqueue-to-start time
//! - `wallet_scheduler_retries_total` / `wallet_scheduler_failures_total` (counters)
//!
//! # Design Decisions
//! - Hooks are side-effect only and never influence control flow
//! - Recording without an installed recorder is a no-op

use std::net::SocketAddr;
use std::time::Duration;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::{ConnectionStatus, HealthCondition};

/// Observer of scheduler activity.
pub trait Instrumentation: Send + Sync {
    /// The number of queued requests changed.
    fn queue_depth_changed(&self, _depth: usize) {}

    /// A request started after waiting `wait` since it was enqueued.
    fn request_waited(&self, _wait: Duration) {}

    /// A failed request will run again as `attempt` after `delay`.
    fn retry_scheduled(&self, _attempt: u32, _delay: Duration) {}

    /// A request failed for good after `attempts` executions.
    fn request_failed(&self, _attempts: u32) {}
}

/// Instrumentation that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInstrumentation;

impl Instrumentation for NoopInstrumentation {}

/// Instrumentation that reports through the `metrics` facade.
#[derive(Debug, Clone)]
pub struct MetricsInstrumentation {
    scheduler: String,
}

impl MetricsInstrumentation {
    /// `scheduler` labels every series, so several schedulers can coexist.
    pub fn new(scheduler: impl Into<String>) -> Self {
        Self {
            scheduler: scheduler.into(),
        }
    }
}

impl Instrumentation for MetricsInstrumentation {
    fn queue_depth_changed(&self, depth: usize) {
        metrics::gauge!("wallet_scheduler_queue_depth", "scheduler" => self.scheduler.clone())
            .set(depth as f64);
    }

    fn request_waited(&self, wait: Duration) {
        metrics::histogram!("wallet_scheduler_wait_seconds", "scheduler" => self.scheduler.clone())
            .record(wait.as_secs_f64());
    }

    fn retry_scheduled(&self, _attempt: u32, _delay: Duration) {
        metrics::counter!("wallet_scheduler_retries_total", "scheduler" => self.scheduler.clone())
            .increment(1);
    }

    fn request_failed(&self, _attempts: u32) {
        metrics::counter!("wallet_scheduler_failures_total", "scheduler" => self.scheduler.clone())
            .increment(1);
    }
}

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_pool_status(status: ConnectionStatus) {
    let value = match status {
        ConnectionStatus::Offline => 0.0,
        ConnectionStatus::Connecting => 1.0,
        ConnectionStatus::Online => 2.0,
    };
    metrics::gauge!("wallet_pool_status").set(value);
}

pub fn record_node_health(endpoint: &str, condition: HealthCondition) {
    let value = match condition {
        HealthCondition::Healthy => 1.0,
        HealthCondition::Degraded => 0.5,
        HealthCondition::Unhealthy => 0.0,
    };
    metrics::gauge!("wallet_node_health", "endpoint" => endpoint.to_string()).set(value);
}

pub fn record_probe_latency(endpoint: &str, latency: Duration) {
    metrics::histogram!("wallet_node_probe_seconds", "endpoint" => endpoint.to_string())
        .record(latency.as_secs_f64());
}
