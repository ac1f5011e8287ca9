//! Multi-server connection pool.
//!
//! # Data Flow
//! ```text
//! acquire()
//!     → refresh health (lapsed quarantines, persisted snapshots)
//!     → roles.rs (primary / standby / candidates)
//!     → traversal: primary, standby, eligible by latency, quarantined by deadline
//!     → per server: start if needed → ping → record success or failure
//!     → primary's connection, or NoHealthyServer
//! ```
//!
//! # Design Decisions
//! - One task owns all server state; handles talk to it over channels
//! - Every acquisition re-probes liveness, trading throughput for correctness
//! - Quarantine delay = max(server budget, global budget), capped, plus jitter
//! - Health persistence failures stop failover and surface immediately

pub mod actor;
pub mod connection;
pub mod roles;
mod server;

pub use actor::{ConnectionPool, PoolError, PoolResult, RoleDescription};
pub use connection::{ConnectionError, NodeConnection};
pub use roles::{determine_roles, Role, RoleAssignment, ServerMetrics};
