//! Resilience primitives.
//!
//! # Data Flow
//! ```text
//! Failure observed (pool probe or scheduled operation):
//!     → backoff.rs (exponential delay for the attempt number + jitter)
//!     → retry_budget.rs (token bucket: extra wait when permits run out)
//!     → caller schedules the next attempt at now + delay
//! ```
//!
//! # Design Decisions
//! - Backoff and budget are independent; callers combine them
//! - Both operate on tokio's monotonic `Instant`, never wall-clock time
//! - Budgets are plain values owned by one actor, not shared state

pub mod backoff;
pub mod retry_budget;

pub use backoff::{jitter, Backoff};
pub use retry_budget::RetryBudget;
