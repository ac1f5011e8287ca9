//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → WalletNetConfig (validated, immutable)
//!     → sections handed to the pool and the scheduler
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Invalid values fail fast; nothing is silently clamped

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackoffConfig, BudgetConfig, HealthConfig, ObservabilityConfig, PoolConfig, SchedulerConfig,
    WalletNetConfig,
};
pub use validation::ValidationError;
