//! Server health subsystem.
//!
//! # Data Flow
//! ```text
//! Probe outcome (pool acquisition / reconnect):
//!     → state.rs (classify condition, map to wallet status)
//!     → repository.rs (persist snapshot, if a repository is configured)
//!
//! Startup:
//!     repository.rs (history per endpoint)
//!     → pool warms its in-memory server records
//! ```
//!
//! # Design Decisions
//! - The repository is the durable source of truth; the pool keeps a cache
//! - Persistence is optional; absence means in-memory operation
//! - Write failures are surfaced, never swallowed

pub mod repository;
pub mod state;

pub use repository::{
    HealthRepository, InMemoryHealthRepository, JsonFileHealthRepository, RepositoryError,
};
pub use state::{ClockPair, ConnectionStatus, HealthCondition, ServerHealthSnapshot};
