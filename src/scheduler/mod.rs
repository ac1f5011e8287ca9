//! Keyed request scheduler.
//!
//! # Data Flow
//! ```text
//! perform / enqueue (key, priority, policy, operation)
//!     → handle.rs (erase result type, send to task)
//!     → actor.rs:
//!         key active?  → store as replacement (displaced one cancelled)
//!         key queued?  → replace queued request in place
//!         otherwise    → insert by priority, FIFO within priority
//!     → admission: concurrency ceiling, global start spacing, not suspended
//!     → operation runs on its own task, racing a cancel signal
//!     → finish: success | cancelled | retry (backoff + jitter + budget) | failed
//!     → replacement promoted to the front of the queue
//! ```
//!
//! # Design Decisions
//! - At most one queued and one active request per key
//! - One pending successor per active key, replaced synchronously
//! - Retries draw from a single token bucket shared by every key
//! - Every `perform` caller receives exactly one outcome

pub mod actor;
pub mod handle;
pub mod request;

pub use actor::SchedulerStats;
pub use handle::{KeyHandle, PendingResult, RequestScheduler};
pub use request::{
    BoxError, Cancelled, Priority, RequestKey, RetryPolicy, SchedulerError, SchedulerResult,
};
