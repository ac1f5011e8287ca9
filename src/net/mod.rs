//! Node transports.
//!
//! # Data Flow
//! ```text
//! Pool probe / gateway call
//!     → electrum.rs (TCP connect under timeout)
//!     → newline-delimited JSON-RPC request
//!     → response matched by id (notifications skipped)
//! ```
//!
//! # Design Decisions
//! - One socket per server, calls serialized behind a mutex
//! - Broken sockets are dropped; the pool decides when to reconnect

pub mod electrum;

pub use electrum::{ElectrumConnection, DEFAULT_HOST, DEFAULT_PORT};
