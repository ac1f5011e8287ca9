//! Bitcoin Cash wallet network resilience core.
//!
//! Keeps a wallet talking to a healthy Electrum server and paces the
//! requests it sends.

// Core subsystems
pub mod config;
pub mod gateway;
pub mod net;
pub mod pool;
pub mod scheduler;

// Server health
pub mod health;

// Cross-cutting concerns
pub mod observability;
pub mod resilience;

pub use config::WalletNetConfig;
pub use gateway::NodeGateway;
pub use health::{ConnectionStatus, HealthRepository, JsonFileHealthRepository};
pub use net::ElectrumConnection;
pub use pool::{ConnectionPool, NodeConnection, PoolError};
pub use scheduler::{Priority, RequestScheduler, RetryPolicy, SchedulerError};
