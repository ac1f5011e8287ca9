//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pool and scheduler produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (gauges, counters, histograms via the metrics facade)
//!
//! Consumers:
//!     → stdout log stream
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields, not formatted strings
//! - Metrics are cheap and optional; nothing depends on a recorder

pub mod logging;
pub mod metrics;

pub use metrics::{Instrumentation, MetricsInstrumentation, NoopInstrumentation};
